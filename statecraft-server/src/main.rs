use statecraft_core::Orchestrator;
use statecraft_server::grpc::proto::statecraft_server::StatecraftServer;
use statecraft_server::grpc::StatecraftService;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let addr = "0.0.0.0:50061".parse()?;

    let config = statecraft_core::config::StatecraftConfig::from_env();
    let orchestrator = Orchestrator::new(config.send_and_wait_timeout(), config.mailbox_capacity);

    tracing::info!(%addr, "statecraft gRPC server listening");

    let service = StatecraftService::new(orchestrator);

    Server::builder()
        .add_service(StatecraftServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
