use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditStatus, Protocol};
use crate::auth::{AuthenticatedPrincipal, Role};
use crate::cleanup::{CleanupOptions, CleanupSummary};
use crate::error::{HephaestusError, HephaestusResult};
use crate::extractor::BearerPrincipal;
use crate::facade::{self, GuardRailsOutcome, GuardRailsRequest};
use crate::analytics::RawAnalyticsEvent;
use crate::state::AppState;
use crate::task_manager::{Task, TaskStatus};

pub async fn root() -> Json<Value> {
    Json(serde_json::json!({
        "service": "hephaestus",
        "run_id": crate::config::RUN_ID.to_string(),
    }))
}

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Waits for a created task to reach a terminal state, polling the
/// registry and waking early on progress-channel activity rather than
/// busy-looping.
async fn await_task_completion(
    state: &AppState,
    id: Uuid,
    principal: &AuthenticatedPrincipal,
) -> HephaestusResult<Task> {
    let mut progress = state.task_manager.subscribe(id)?;
    loop {
        let task = state.task_manager.get_status(id, Some(principal))?;
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
            return Ok(task);
        }
        let poll = Duration::from_millis(state.config.stream_poll_interval_ms);
        let _ = tokio::time::timeout(poll, progress.recv()).await;
    }
}

fn outcome_error(task: &Task) -> HephaestusError {
    let message = task.error.clone().unwrap_or_else(|| "task failed".to_string());
    if message.contains("timed out") {
        HephaestusError::Timeout(message)
    } else {
        HephaestusError::Execution(message)
    }
}

pub async fn run_guard_rails(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Json(request): Json<GuardRailsRequest>,
) -> Result<Json<Value>, HephaestusError> {
    const OPERATION: &str = "rest.guard-rails.run";
    let params = serde_json::json!({
        "workspace": request.workspace,
        "no_format": request.no_format,
        "drift_check": request.drift_check,
        "auto_remediate": request.auto_remediate,
    });

    if let Err(e) = principal.require_role(Role::GuardRails) {
        let _ = state.audit.record(
            &principal.principal,
            &principal.key_id,
            OPERATION,
            Protocol::Rest,
            AuditStatus::Denied,
            params,
            Value::Null,
        );
        return Err(e);
    }

    let task_state = state.clone();
    let task_principal = principal.clone();
    let task_request = request.clone();
    let task_id = state.task_manager.create_task(
        "guard-rails",
        Some(&principal),
        vec![Role::GuardRails],
        None,
        move |_ctx| {
            Box::pin(async move {
                facade::run_guard_rails(&task_state, &task_principal, task_request)
                    .await
                    .map(|outcome: GuardRailsOutcome| {
                        serde_json::to_value(outcome).unwrap_or(Value::Null)
                    })
                    .map_err(|e| e.to_string())
            })
        },
    )?;

    let task = await_task_completion(&state, task_id, &principal).await?;
    if task.status == TaskStatus::Failed {
        let err = outcome_error(&task);
        let _ = state.audit.record(
            &principal.principal,
            &principal.key_id,
            OPERATION,
            Protocol::Rest,
            AuditStatus::Failed,
            params,
            serde_json::json!({ "error": err.to_string() }),
        );
        return Err(err);
    }

    let result = task.result.clone().unwrap_or(Value::Null);
    let _ = state.audit.record(
        &principal.principal,
        &principal.key_id,
        OPERATION,
        Protocol::Rest,
        AuditStatus::Success,
        params,
        result.clone(),
    );
    Ok(Json(serde_json::json!({ "task_id": task_id, "result": result })))
}

pub async fn run_cleanup(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Json(options): Json<CleanupOptions>,
) -> Result<Json<Value>, HephaestusError> {
    const OPERATION: &str = "rest.cleanup.run";
    let params = serde_json::json!({
        "workspace_root": options.workspace_root,
        "deep_clean": options.deep_clean,
        "dry_run": options.dry_run,
    });

    if let Err(e) = principal.require_role(Role::Cleanup) {
        let _ = state.audit.record(
            &principal.principal,
            &principal.key_id,
            OPERATION,
            Protocol::Rest,
            AuditStatus::Denied,
            params,
            Value::Null,
        );
        return Err(e);
    }

    let task_state = state.clone();
    let task_principal = principal.clone();
    let task_options = options.clone();
    let task_id = state.task_manager.create_task(
        "cleanup",
        Some(&principal),
        vec![Role::Cleanup],
        None,
        move |_ctx| {
            Box::pin(async move {
                facade::run_cleanup(&task_state, &task_principal, task_options)
                    .map(|result: CleanupSummary| serde_json::to_value(result).unwrap_or(Value::Null))
                    .map_err(|e| e.to_string())
            })
        },
    )?;

    let task = await_task_completion(&state, task_id, &principal).await?;
    if task.status == TaskStatus::Failed {
        let err = outcome_error(&task);
        let _ = state.audit.record(
            &principal.principal,
            &principal.key_id,
            OPERATION,
            Protocol::Rest,
            AuditStatus::Failed,
            params,
            serde_json::json!({ "error": err.to_string() }),
        );
        return Err(err);
    }

    let result = task.result.clone().unwrap_or(Value::Null);
    let _ = state.audit.record(
        &principal.principal,
        &principal.key_id,
        OPERATION,
        Protocol::Rest,
        AuditStatus::Success,
        params,
        result.clone(),
    );
    Ok(Json(serde_json::json!({ "task_id": task_id, "result": result })))
}

#[derive(Debug, Deserialize)]
pub struct RankingsQuery {
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_strategy() -> String {
    "composite".to_string()
}

fn default_limit() -> usize {
    10
}

pub async fn analytics_rankings(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Query(query): Query<RankingsQuery>,
) -> Result<Json<Value>, HephaestusError> {
    const OPERATION: &str = "rest.analytics.rankings";
    let params = serde_json::json!({ "strategy": query.strategy, "limit": query.limit });
    let result = facade::get_rankings(&state, &principal, &query.strategy, query.limit);
    record_outcome(&state, &principal, OPERATION, &result, params);
    let entries = result?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

pub async fn analytics_ingest(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Json(events): Json<Vec<RawAnalyticsEvent>>,
) -> Result<Json<Value>, HephaestusError> {
    const OPERATION: &str = "rest.analytics.ingest";
    let params = serde_json::json!({ "event_count": events.len() });
    let result = facade::ingest_analytics(&state, &principal, events);
    record_outcome(&state, &principal, OPERATION, &result, params);
    let summary = result?;
    Ok(Json(serde_json::to_value(summary).unwrap_or(Value::Null)))
}

fn record_outcome<T: serde::Serialize>(
    state: &AppState,
    principal: &AuthenticatedPrincipal,
    operation: &str,
    result: &HephaestusResult<T>,
    params: Value,
) {
    let (status, outcome) = match result {
        Ok(value) => (AuditStatus::Success, serde_json::to_value(value).unwrap_or(Value::Null)),
        Err(HephaestusError::Authorization { .. }) | Err(HephaestusError::Authentication(_)) => {
            (AuditStatus::Denied, Value::Null)
        }
        Err(HephaestusError::Validation(_)) => return,
        Err(e) => (AuditStatus::Failed, serde_json::json!({ "error": e.to_string() })),
    };
    let _ = state.audit.record(
        &principal.principal,
        &principal.key_id,
        operation,
        Protocol::Rest,
        status,
        params,
        outcome,
    );
}

pub async fn task_status(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, HephaestusError> {
    let task = state.task_manager.get_status(id, Some(&principal))?;
    Ok(Json(task))
}

pub async fn task_stream(
    State(state): State<AppState>,
    BearerPrincipal(principal): BearerPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HephaestusError> {
    // Access check up front so an unauthorized caller never opens a stream.
    state.task_manager.get_status(id, Some(&principal))?;
    let rx = state.task_manager.subscribe(id)?;
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(state.config.task_default_timeout_secs);

    let stream = futures_util::stream::unfold((rx, deadline, false), move |(mut rx, deadline, done)| async move {
        if done {
            return None;
        }
        tokio::select! {
            biased;
            message = rx.recv() => {
                match message {
                    Ok(value) => {
                        let terminal = value
                            .get("status")
                            .and_then(Value::as_str)
                            .map(|s| s == "completed" || s == "failed")
                            .unwrap_or(false);
                        let event = Event::default().data(value.to_string());
                        Some((Ok::<_, std::convert::Infallible>(event), (rx, deadline, terminal)))
                    }
                    Err(_) => None,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                let payload = serde_json::json!({ "status": "timeout", "error": "Task stream timed out" });
                let event = Event::default().data(payload.to_string());
                Some((Ok(event), (rx, deadline, true)))
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
