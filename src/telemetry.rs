use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

/// Required/optional field names for a named telemetry event.
struct EventSchema {
    required: &'static [&'static str],
}

static EVENT_REGISTRY: Lazy<HashMap<&'static str, EventSchema>> = Lazy::new(|| {
    let mut registry = HashMap::new();
    registry.insert(
        "guard_rails.gate_evaluated",
        EventSchema {
            required: &["gate", "passed", "duration_seconds"],
        },
    );
    registry.insert(
        "cleanup.path_removed",
        EventSchema {
            required: &["path", "category"],
        },
    );
    registry.insert(
        "cleanup.path_skipped",
        EventSchema {
            required: &["path", "reason"],
        },
    );
    registry.insert(
        "marketplace.fetch",
        EventSchema {
            required: &["plugin"],
        },
    );
    registry.insert(
        "marketplace.verified",
        EventSchema {
            required: &["plugin", "identity"],
        },
    );
    registry.insert(
        "marketplace.dependencies_resolved",
        EventSchema {
            required: &["plugin", "dependency_count"],
        },
    );
    registry.insert(
        "marketplace.registered",
        EventSchema {
            required: &["plugin", "version"],
        },
    );
    registry.insert(
        "analytics.event_rejected",
        EventSchema {
            required: &["reason"],
        },
    );
    registry
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TelemetryValidationError {
    #[error("telemetry event `{event}` is not registered")]
    UnknownEvent { event: String },
    #[error("telemetry event `{event}` is missing required field `{field}`")]
    MissingField { event: String, field: &'static str },
}

/// Validates a named event's payload against the static registry and, when
/// telemetry is enabled, emits it as a structured `tracing` event.
pub fn emit_event(
    event: &str,
    fields: Value,
    telemetry_enabled: bool,
) -> Result<(), TelemetryValidationError> {
    let schema = EVENT_REGISTRY
        .get(event)
        .ok_or_else(|| TelemetryValidationError::UnknownEvent {
            event: event.to_string(),
        })?;
    for field in schema.required {
        if fields.get(field).is_none() {
            return Err(TelemetryValidationError::MissingField {
                event: event.to_string(),
                field,
            });
        }
    }
    if telemetry_enabled {
        tracing::info!(event, payload = %fields, "telemetry event");
    }
    Ok(())
}

/// In-process counters, exported via the Prometheus endpoint when enabled.
/// No-op bookkeeping otherwise, matching the registry-driven validation
/// approach used for structured events above.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: DashMap<&'static str, AtomicU64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &'static str) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self, name: &'static str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_payload_passes_validation() {
        let payload = json!({"gate": "lint", "passed": true, "duration_seconds": 0.4});
        assert!(emit_event("guard_rails.gate_evaluated", payload, false).is_ok());
    }

    #[test]
    fn missing_field_is_reported() {
        let payload = json!({"gate": "lint"});
        let err = emit_event("guard_rails.gate_evaluated", payload, false).unwrap_err();
        assert!(matches!(
            err,
            TelemetryValidationError::MissingField { field: "passed", .. }
        ));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let err = emit_event("nonexistent", json!({}), false).unwrap_err();
        assert!(matches!(err, TelemetryValidationError::UnknownEvent { .. }));
    }

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment("marketplace.fetch");
        metrics.increment("marketplace.fetch");
        assert_eq!(metrics.value("marketplace.fetch"), 2);
        assert_eq!(metrics.value("marketplace.registered"), 0);
    }
}
