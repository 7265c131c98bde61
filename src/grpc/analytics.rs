use serde_json::Value;
use tonic::{Request, Response, Status, Streaming};

use crate::analytics::RawAnalyticsEvent;
use crate::audit::{self, AuditStatus, Protocol};
use crate::facade;
use crate::state::AppState;

use super::interceptor::authenticate;
use super::proto::analytics_service_server::AnalyticsService;
use super::proto::{
    AnalyticsEvent, HotspotsRequest, IngestSummary, RankingEntry as ProtoRankingEntry,
    RankingsRequest, RankingsResponse,
};

pub struct AnalyticsServiceImpl {
    state: AppState,
}

impl AnalyticsServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn to_proto_entry(entry: &crate::analytics::RankingEntry) -> ProtoRankingEntry {
    ProtoRankingEntry {
        rank: entry.rank as u32,
        path: entry.path.clone(),
        score: entry.score,
        churn: entry.churn,
        coverage: entry.coverage,
        uncovered_lines: entry.uncovered_lines,
        rationale: entry.rationale.clone(),
    }
}

fn to_raw_event(event: AnalyticsEvent) -> RawAnalyticsEvent {
    let metrics = serde_json::from_str(&event.metrics_json).unwrap_or(Value::Null);
    let metadata = serde_json::from_str(&event.metadata_json).unwrap_or(Value::Null);
    RawAnalyticsEvent {
        source: (!event.source.is_empty()).then_some(event.source),
        kind: (!event.kind.is_empty()).then_some(event.kind),
        value: event.value.map(|v| serde_json::json!(v)),
        unit: event.unit,
        metrics,
        metadata,
        timestamp: None,
    }
}

#[tonic::async_trait]
impl AnalyticsService for AnalyticsServiceImpl {
    async fn get_rankings(
        &self,
        request: Request<RankingsRequest>,
    ) -> Result<Response<RankingsResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let req = request.into_inner();
        let params = serde_json::json!({ "strategy": req.strategy, "limit": req.limit });
        let entries = facade::get_rankings(&self.state, &principal, &req.strategy, req.limit as usize)
            .map_err(|e| {
                let _ = self.state.audit.record(
                    &principal.principal,
                    &principal.key_id,
                    "grpc.analytics.rankings",
                    Protocol::Grpc,
                    audit::status_for_error(&e),
                    params.clone(),
                    serde_json::json!({ "error": e.to_string() }),
                );
                Status::from(&e)
            })?;
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.analytics.rankings",
            Protocol::Grpc,
            AuditStatus::Success,
            params,
            serde_json::json!({ "entries": entries.len() }),
        );
        Ok(Response::new(RankingsResponse {
            entries: entries.iter().map(to_proto_entry).collect(),
        }))
    }

    async fn get_hotspots(
        &self,
        request: Request<HotspotsRequest>,
    ) -> Result<Response<RankingsResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let limit = request.into_inner().limit as usize;
        let params = serde_json::json!({ "limit": limit });
        let entries = facade::get_hotspots(&self.state, &principal, limit).map_err(|e| {
            let _ = self.state.audit.record(
                &principal.principal,
                &principal.key_id,
                "grpc.analytics.hotspots",
                Protocol::Grpc,
                audit::status_for_error(&e),
                params.clone(),
                serde_json::json!({ "error": e.to_string() }),
            );
            Status::from(&e)
        })?;
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.analytics.hotspots",
            Protocol::Grpc,
            AuditStatus::Success,
            params,
            serde_json::json!({ "entries": entries.len() }),
        );
        Ok(Response::new(RankingsResponse {
            entries: entries.iter().map(to_proto_entry).collect(),
        }))
    }

    async fn stream_ingest(
        &self,
        request: Request<Streaming<AnalyticsEvent>>,
    ) -> Result<Response<IngestSummary>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let mut stream = request.into_inner();
        let mut raw_events = Vec::new();
        while let Some(event) = stream.message().await? {
            raw_events.push(to_raw_event(event));
        }
        let total = raw_events.len();
        let summary = facade::ingest_analytics(&self.state, &principal, raw_events)
            .map_err(|e| Status::from(&e))?;
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.analytics.stream_ingest",
            Protocol::Grpc,
            AuditStatus::Success,
            serde_json::json!({ "event_count": total }),
            serde_json::json!({ "accepted": summary.accepted, "rejected": summary.rejected }),
        );
        Ok(Response::new(IngestSummary {
            accepted: summary.accepted as u32,
            rejected: summary.rejected as u32,
            total_events: summary.total_events as u32,
        }))
    }
}
