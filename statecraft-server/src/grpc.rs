use statecraft_core::model::{ActionTable, GuardTable};
use statecraft_core::{Backpressure as CoreBackpressure, LoadError, BuildError, Machine, Orchestrator, Phase as CorePhase, SendError, Snapshot as CoreSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("statecraft.v1");
}

use proto::statecraft_server::Statecraft;
use proto::*;

/// Transport-facing service: owns nothing but an [`Orchestrator`] handle and
/// translates proto messages to/from the engine's own types. No business
/// logic lives here.
pub struct StatecraftService {
    orchestrator: Orchestrator,
}

impl StatecraftService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl Statecraft for StatecraftService {
    async fn load_definition(
        &self,
        request: Request<LoadDefinitionRequest>,
    ) -> Result<Response<LoadDefinitionResponse>, Status> {
        let req = request.into_inner();

        let doc: serde_json::Value = serde_json::from_str(&req.definition_json)
            .map_err(|e| Status::invalid_argument(format!("definition_json is not valid JSON: {e}")))?;

        let graph = statecraft_core::loader::load(&doc).map_err(load_error_to_status)?;
        let machine = Machine::build(
            req.machine_id.clone(),
            Arc::new(graph),
            ActionTable::new(),
            GuardTable::new(),
        )
        .map_err(build_error_to_status)?;

        let initial_context = req
            .initial_context_json
            .as_deref()
            .map(|raw| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw))
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("initial_context_json is not valid JSON: {e}")))?;

        self.orchestrator
            .register(machine, backpressure_from_proto(req.backpressure), initial_context)
            .await;

        Ok(Response::new(LoadDefinitionResponse {
            machine_id: req.machine_id,
        }))
    }

    async fn unregister(
        &self,
        request: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterResponse>, Status> {
        let req = request.into_inner();
        let removed = self.orchestrator.unregister(&req.machine_id).await;
        Ok(Response::new(UnregisterResponse { removed }))
    }

    async fn send_fire_and_forget(
        &self,
        request: Request<SendRequest>,
    ) -> Result<Response<SendFireAndForgetResponse>, Status> {
        let req = request.into_inner();
        let payload = parse_payload(req.payload_json.as_deref())?;
        self.orchestrator
            .send_fire_and_forget(&req.machine_id, req.event, payload)
            .await
            .map_err(send_error_to_status)?;
        Ok(Response::new(SendFireAndForgetResponse {}))
    }

    async fn send_and_wait(&self, request: Request<SendRequest>) -> Result<Response<Snapshot>, Status> {
        let req = request.into_inner();
        let payload = parse_payload(req.payload_json.as_deref())?;
        let timeout = (req.timeout_ms > 0).then(|| Duration::from_millis(req.timeout_ms));
        let snapshot = self
            .orchestrator
            .send_and_wait(&req.machine_id, req.event, payload, timeout)
            .await
            .map_err(send_error_to_status)?;
        Ok(Response::new(snapshot_to_proto(snapshot)))
    }

    async fn get_snapshot(&self, request: Request<SnapshotRequest>) -> Result<Response<Snapshot>, Status> {
        let req = request.into_inner();
        let snapshot = self
            .orchestrator
            .snapshot(&req.machine_id)
            .await
            .map_err(send_error_to_status)?;
        Ok(Response::new(snapshot_to_proto(snapshot)))
    }

    async fn reset(&self, request: Request<SnapshotRequest>) -> Result<Response<ResetResponse>, Status> {
        let req = request.into_inner();
        self.orchestrator
            .reset(&req.machine_id)
            .await
            .map_err(send_error_to_status)?;
        Ok(Response::new(ResetResponse {}))
    }

    type WatchEventsStream = tokio_stream::wrappers::ReceiverStream<Result<InterpreterEvent, Status>>;

    async fn watch_events(
        &self,
        request: Request<SnapshotRequest>,
    ) -> Result<Response<Self::WatchEventsStream>, Status> {
        let req = request.into_inner();
        // Confirms the machine exists before opening the stream; the engine
        // does not currently fan its trace out to multiple subscribers, so
        // this starts empty and closes immediately (§9 — tracked as a
        // follow-up once Machine exposes a broadcast trace channel).
        self.orchestrator
            .snapshot(&req.machine_id)
            .await
            .map_err(send_error_to_status)?;
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(Response::new(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}

fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value, Status> {
    match raw {
        Some(raw) => serde_json::from_str(raw).map_err(|e| Status::invalid_argument(format!("payload_json is not valid JSON: {e}"))),
        None => Ok(serde_json::Value::Null),
    }
}

fn snapshot_to_proto(snapshot: CoreSnapshot) -> Snapshot {
    Snapshot {
        machine_id: snapshot.machine_id,
        phase: phase_to_proto(snapshot.phase) as i32,
        configuration: snapshot.configuration,
        context_json: serde_json::to_string(&snapshot.context).unwrap_or_else(|_| "{}".to_string()),
        fault: snapshot.fault.map(|f| FaultInfo {
            node: f.node,
            reason: f.reason,
        }),
    }
}

fn phase_to_proto(phase: CorePhase) -> Phase {
    match phase {
        CorePhase::Created => Phase::Created,
        CorePhase::Running => Phase::Running,
        CorePhase::Stopped => Phase::Stopped,
        CorePhase::Faulted => Phase::Faulted,
    }
}

fn backpressure_from_proto(value: i32) -> CoreBackpressure {
    match Backpressure::try_from(value).unwrap_or(Backpressure::BlockSender) {
        Backpressure::DropNewest => CoreBackpressure::DropNewest,
        Backpressure::DropOldest => CoreBackpressure::DropOldest,
        _ => CoreBackpressure::BlockSender,
    }
}

fn load_error_to_status(err: LoadError) -> Status {
    Status::invalid_argument(err.to_string())
}

fn build_error_to_status(err: BuildError) -> Status {
    Status::failed_precondition(err.to_string())
}

fn send_error_to_status(err: SendError) -> Status {
    match err {
        SendError::UnknownTarget(_) => Status::not_found(err.to_string()),
        SendError::Timeout => Status::deadline_exceeded(err.to_string()),
        SendError::Backpressure => Status::resource_exhausted(err.to_string()),
        SendError::NotRunning => Status::failed_precondition(err.to_string()),
        SendError::IllegalReentrantAsk => Status::failed_precondition(err.to_string()),
    }
}
