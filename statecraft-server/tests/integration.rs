//! Integration tests: exercise the full statechart lifecycle through the
//! engine facade the gRPC handlers delegate to (load -> start -> send ->
//! snapshot), plus an ignored over-the-wire smoke test.

use std::time::Duration;

use serde_json::json;
use statecraft_core::model::{ActionTable, GuardTable};
use statecraft_core::{loader, Backpressure, Machine, Orchestrator, Phase};

fn traffic_light_with_after() -> serde_json::Value {
    json!({
        "id": "trafficLight",
        "initial": "red",
        "states": {
            "red": {
                "on": { "TIMER": "yellow" },
                "after": { "50ms": "yellow" }
            },
            "yellow": { "on": { "TIMER": "green" } },
            "green": { "on": { "TIMER": "red" } }
        }
    })
}

fn build_traffic_light(id: &str) -> Machine {
    let graph = std::sync::Arc::new(loader::load(&traffic_light_with_after()).unwrap());
    Machine::build(id, graph, ActionTable::new(), GuardTable::new()).unwrap()
}

#[tokio::test]
async fn full_lifecycle_load_start_send_snapshot() {
    let orchestrator = Orchestrator::new(Duration::from_secs(1), 16);
    orchestrator
        .register(build_traffic_light("light-1"), Backpressure::BlockSender, None)
        .await;

    let snapshot = orchestrator.snapshot("light-1").await.unwrap();
    assert_eq!(snapshot.phase, Phase::Running);
    assert_eq!(snapshot.configuration, vec!["trafficLight.red".to_string()]);

    let snapshot = orchestrator
        .send_and_wait("light-1", "TIMER", serde_json::Value::Null, None)
        .await
        .unwrap();
    assert_eq!(snapshot.configuration, vec!["trafficLight.yellow".to_string()]);

    let snapshot = orchestrator
        .send_and_wait("light-1", "TIMER", serde_json::Value::Null, None)
        .await
        .unwrap();
    assert_eq!(snapshot.configuration, vec!["trafficLight.green".to_string()]);
}

#[tokio::test]
async fn two_machines_exchange_events_via_orchestrator() {
    let orchestrator = Orchestrator::new(Duration::from_secs(1), 16);
    orchestrator
        .register(build_traffic_light("a"), Backpressure::BlockSender, None)
        .await;
    orchestrator
        .register(build_traffic_light("b"), Backpressure::BlockSender, None)
        .await;

    orchestrator
        .send_fire_and_forget("a", "TIMER", serde_json::Value::Null)
        .await
        .unwrap();
    orchestrator
        .send_fire_and_forget("b", "TIMER", serde_json::Value::Null)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;

    let a = orchestrator.snapshot("a").await.unwrap();
    let b = orchestrator.snapshot("b").await.unwrap();
    assert_eq!(a.configuration, vec!["trafficLight.yellow".to_string()]);
    assert_eq!(b.configuration, vec!["trafficLight.yellow".to_string()]);
}

#[tokio::test]
async fn unregister_stops_the_actor() {
    let orchestrator = Orchestrator::new(Duration::from_secs(1), 16);
    orchestrator
        .register(build_traffic_light("light-1"), Backpressure::BlockSender, None)
        .await;
    assert!(orchestrator.unregister("light-1").await);

    let result = orchestrator
        .send_fire_and_forget("light-1", "TIMER", serde_json::Value::Null)
        .await;
    assert!(result.is_err());
}

/// gRPC over-the-wire smoke test against a running server.
///
/// Set STATECRAFT_URL to run (e.g., `STATECRAFT_URL=http://127.0.0.1:50061`).
/// Skipped by default. Run with:
///   cargo test --test integration grpc_smoke -- --ignored
#[tokio::test]
#[ignore]
async fn grpc_smoke() {
    use statecraft_server::grpc::proto::statecraft_client::StatecraftClient;
    use statecraft_server::grpc::proto::*;

    let url = std::env::var("STATECRAFT_URL").unwrap_or_else(|_| "http://127.0.0.1:50061".to_string());
    let mut client = StatecraftClient::connect(url.clone())
        .await
        .unwrap_or_else(|e| panic!("cannot connect to {url}: {e}"));

    let definition = traffic_light_with_after().to_string();
    client
        .load_definition(LoadDefinitionRequest {
            machine_id: "smoke-1".to_string(),
            definition_json: definition,
            initial_context_json: None,
            backpressure: statecraft_server::grpc::proto::Backpressure::BlockSender as i32,
        })
        .await
        .expect("LoadDefinition RPC failed");

    let snapshot = client
        .send_and_wait(SendRequest {
            machine_id: "smoke-1".to_string(),
            event: "TIMER".to_string(),
            payload_json: None,
            timeout_ms: 1000,
        })
        .await
        .expect("SendAndWait RPC failed")
        .into_inner();
    assert_eq!(snapshot.configuration, vec!["trafficLight.yellow".to_string()]);

    client
        .unregister(UnregisterRequest {
            machine_id: "smoke-1".to_string(),
        })
        .await
        .expect("Unregister RPC failed");
}
