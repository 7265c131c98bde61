use std::pin::Pin;

use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::audit::{self, AuditStatus, Protocol};
use crate::facade::{self, GuardRailsRequest as DomainGuardRailsRequest, ProgressSink, QualityGateResult};
use crate::state::AppState;

use super::interceptor::authenticate;
use super::proto::quality_service_server::QualityService;
use super::proto::{
    DriftRecord as ProtoDriftRecord, DriftRequest, DriftResponse, GuardRailsProgress,
    GuardRailsRequest, GuardRailsResponse, QualityGate,
};

pub struct QualityServiceImpl {
    state: AppState,
}

impl QualityServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn to_proto_gate(gate: &QualityGateResult) -> QualityGate {
    QualityGate {
        name: gate.name.clone(),
        passed: gate.passed,
        message: gate.message.clone(),
        duration_seconds: gate.duration_seconds,
        metadata_json: gate.metadata.to_string(),
    }
}

fn to_domain_request(request: GuardRailsRequest) -> DomainGuardRailsRequest {
    DomainGuardRailsRequest {
        workspace: request.workspace,
        no_format: request.no_format,
        drift_check: request.drift_check,
        auto_remediate: request.auto_remediate,
    }
}

#[tonic::async_trait]
impl QualityService for QualityServiceImpl {
    async fn run_guard_rails(
        &self,
        request: Request<GuardRailsRequest>,
    ) -> Result<Response<GuardRailsResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let domain_request = to_domain_request(request.into_inner());
        let outcome = facade::run_guard_rails(&self.state, &principal, domain_request)
            .await
            .map_err(|e| {
                let _ = self.state.audit.record(
                    &principal.principal,
                    &principal.key_id,
                    "grpc.quality.run_guard_rails",
                    Protocol::Grpc,
                    audit::status_for_error(&e),
                    serde_json::json!({}),
                    serde_json::json!({ "error": e.to_string() }),
                );
                Status::from(&e)
            })?;

        let gates = outcome.gates.iter().map(to_proto_gate).collect();
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.quality.run_guard_rails",
            Protocol::Grpc,
            AuditStatus::Success,
            serde_json::json!({}),
            serde_json::json!({ "success": outcome.success }),
        );
        Ok(Response::new(GuardRailsResponse {
            gates,
            success: outcome.success,
            duration_seconds: outcome.duration_seconds,
            task_id: uuid::Uuid::new_v4().to_string(),
        }))
    }

    type RunGuardRailsStreamStream =
        Pin<Box<dyn Stream<Item = Result<GuardRailsProgress, Status>> + Send + 'static>>;

    async fn run_guard_rails_stream(
        &self,
        request: Request<GuardRailsRequest>,
    ) -> Result<Response<Self::RunGuardRailsStreamStream>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let domain_request = to_domain_request(request.into_inner());
        let state = self.state.clone();

        let (proto_tx, proto_rx) =
            tokio::sync::mpsc::channel::<Result<GuardRailsProgress, Status>>(16);

        tokio::spawn(async move {
            let (gate_tx, mut gate_rx) = tokio::sync::mpsc::channel::<QualityGateResult>(16);
            let forward_tx = proto_tx.clone();
            let forward = tokio::spawn(async move {
                while let Some(gate) = gate_rx.recv().await {
                    let progress = GuardRailsProgress {
                        gate: Some(to_proto_gate(&gate)),
                        completed: false,
                        success: gate.passed,
                    };
                    if forward_tx.send(Ok(progress)).await.is_err() {
                        return;
                    }
                }
            });

            let sink: ProgressSink = gate_tx;
            let result = facade::run_guard_rails_with_progress(
                &state,
                &principal,
                domain_request,
                Some(&sink),
            )
            .await;
            drop(sink);
            let _ = forward.await;

            match result {
                Ok(outcome) => {
                    let _ = state.audit.record(
                        &principal.principal,
                        &principal.key_id,
                        "grpc.quality.run_guard_rails_stream",
                        Protocol::Grpc,
                        AuditStatus::Success,
                        serde_json::json!({}),
                        serde_json::json!({ "success": outcome.success }),
                    );
                    let _ = proto_tx
                        .send(Ok(GuardRailsProgress {
                            gate: None,
                            completed: true,
                            success: outcome.success,
                        }))
                        .await;
                }
                Err(e) => {
                    let _ = state.audit.record(
                        &principal.principal,
                        &principal.key_id,
                        "grpc.quality.run_guard_rails_stream",
                        Protocol::Grpc,
                        audit::status_for_error(&e),
                        serde_json::json!({}),
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    let _ = proto_tx.send(Err(Status::from(&e))).await;
                }
            }
        });

        let stream: Self::RunGuardRailsStreamStream = Box::pin(ReceiverStream::new(proto_rx));
        Ok(Response::new(stream))
    }

    async fn check_drift(
        &self,
        request: Request<DriftRequest>,
    ) -> Result<Response<DriftResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let workspace = request.into_inner().workspace;
        let records = facade::drift_summary(&self.state, &principal, &workspace)
            .await
            .map_err(|e| {
                let _ = self.state.audit.record(
                    &principal.principal,
                    &principal.key_id,
                    "grpc.quality.check_drift",
                    Protocol::Grpc,
                    audit::status_for_error(&e),
                    serde_json::json!({ "workspace": workspace.clone() }),
                    serde_json::json!({ "error": e.to_string() }),
                );
                Status::from(&e)
            })?;
        let has_drift = records.iter().any(|r| r.has_drift);
        let drifts = records
            .iter()
            .map(|r| ProtoDriftRecord {
                name: r.name.clone(),
                expected: r.expected.clone(),
                actual: r.actual.clone(),
                is_missing: r.is_missing,
                has_drift: r.has_drift,
            })
            .collect();
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.quality.check_drift",
            Protocol::Grpc,
            AuditStatus::Success,
            serde_json::json!({ "workspace": workspace }),
            serde_json::json!({ "has_drift": has_drift }),
        );
        Ok(Response::new(DriftResponse { drifts, has_drift }))
    }
}
