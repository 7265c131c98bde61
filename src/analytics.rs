use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HephaestusError;
use crate::telemetry::{self, MetricsRegistry};

const RING_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    pub source: String,
    pub kind: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub metrics: HashMap<String, f64>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAnalyticsEvent {
    pub source: Option<String>,
    pub kind: Option<String>,
    pub value: Option<Value>,
    pub unit: Option<String>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub total_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub path: String,
    pub score: f64,
    pub churn: f64,
    pub coverage: f64,
    pub uncovered_lines: u32,
    pub rationale: String,
}

/// Thread-safe bounded buffer of recently ingested analytics events, the
/// Rust counterpart of a deque-backed streaming ingestor.
pub struct AnalyticsBuffer {
    events: Mutex<VecDeque<AnalyticsEvent>>,
}

impl Default for AnalyticsBuffer {
    fn default() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAPACITY)),
        }
    }
}

fn parse_lenient_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{raw}+00:00")) {
        return dt.with_timezone(&Utc);
    }
    Utc::now()
}

fn coerce_metrics(value: &Value) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if let Some(map) = value.as_object() {
        for (key, val) in map {
            if let Some(number) = val.as_f64() {
                metrics.insert(key.clone(), number);
            } else if let Some(text) = val.as_str() {
                if let Ok(number) = text.parse::<f64>() {
                    metrics.insert(key.clone(), number);
                }
            }
        }
    }
    metrics
}

impl AnalyticsBuffer {
    pub fn ingest(
        &self,
        raw_events: Vec<RawAnalyticsEvent>,
        metrics: &MetricsRegistry,
        telemetry_enabled: bool,
    ) -> Result<IngestSummary, HephaestusError> {
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut buffer = self
            .events
            .lock()
            .map_err(|_| HephaestusError::Internal("analytics buffer lock poisoned".into()))?;

        for raw in raw_events {
            let (Some(source), Some(kind)) = (raw.source.clone(), raw.kind.clone()) else {
                rejected += 1;
                let _ = telemetry::emit_event(
                    "analytics.event_rejected",
                    serde_json::json!({ "reason": "missing source or kind" }),
                    telemetry_enabled,
                );
                continue;
            };
            if source.trim().is_empty() || kind.trim().is_empty() {
                rejected += 1;
                let _ = telemetry::emit_event(
                    "analytics.event_rejected",
                    serde_json::json!({ "reason": "empty source or kind" }),
                    telemetry_enabled,
                );
                continue;
            }

            let event = AnalyticsEvent {
                source,
                kind,
                value: raw.value.as_ref().and_then(Value::as_f64),
                unit: raw.unit,
                metrics: coerce_metrics(&raw.metrics),
                metadata: raw.metadata,
                timestamp: parse_lenient_timestamp(raw.timestamp.as_deref()),
            };
            if buffer.len() == RING_BUFFER_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(event);
            accepted += 1;
            metrics.increment("analytics.event_accepted");
        }

        Ok(IngestSummary {
            accepted,
            rejected,
            total_events: buffer.len(),
        })
    }

    pub fn snapshot(&self) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Ranks hotspots from ingested coverage/churn-shaped events, or falls back
/// to a deterministic synthetic set when nothing has been ingested yet.
pub fn rankings(buffer: &AnalyticsBuffer, strategy: &str, limit: usize) -> Vec<RankingEntry> {
    let events = buffer.snapshot();
    let mut by_source: HashMap<String, (f64, f64, f64, u32)> = HashMap::new();
    for event in &events {
        let entry = by_source.entry(event.source.clone()).or_default();
        entry.0 += event.metrics.get("churn").copied().unwrap_or(0.0);
        entry.1 += event.metrics.get("coverage").copied().unwrap_or(0.0);
        entry.2 += event.value.unwrap_or(0.0);
        entry.3 += event.metrics.get("uncovered_lines").copied().unwrap_or(0.0) as u32;
    }

    if by_source.is_empty() {
        return synthetic_hotspots(limit);
    }

    let mut ranked: Vec<RankingEntry> = by_source
        .into_iter()
        .map(|(path, (churn, coverage, value, uncovered_lines))| {
            let score = match strategy {
                "churn" => churn,
                "coverage" => -coverage,
                _ => churn + value - coverage,
            };
            RankingEntry {
                rank: 0,
                path,
                score,
                churn,
                coverage,
                uncovered_lines,
                rationale: format!("strategy:{strategy}"),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    for (index, entry) in ranked.iter_mut().enumerate() {
        entry.rank = index + 1;
    }
    ranked
}

/// Deterministic hotspot records, independent of any ingested signal —
/// the gRPC/REST `hotspots` read always returns this fixed set.
pub fn hotspots(limit: usize) -> Vec<RankingEntry> {
    synthetic_hotspots(limit)
}

fn synthetic_hotspots(limit: usize) -> Vec<RankingEntry> {
    let seeds = [
        ("src/core/pipeline.rs", 8.0, 0.42),
        ("src/core/scheduler.rs", 6.5, 0.55),
        ("src/adapters/rest.rs", 4.0, 0.71),
    ];
    seeds
        .iter()
        .take(limit)
        .enumerate()
        .map(|(index, (path, churn, coverage))| RankingEntry {
            rank: index + 1,
            path: path.to_string(),
            score: churn - coverage,
            churn: *churn,
            coverage: *coverage,
            uncovered_lines: ((1.0 - coverage) * 100.0) as u32,
            rationale: "synthetic_hotspot".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> MetricsRegistry {
        MetricsRegistry::new()
    }

    #[test]
    fn accepts_valid_events_and_rejects_invalid_ones() {
        let buffer = AnalyticsBuffer::default();
        let events = vec![
            RawAnalyticsEvent {
                source: Some("src/a.rs".to_string()),
                kind: Some("coverage".to_string()),
                value: Some(Value::from(0.8)),
                unit: None,
                metrics: serde_json::json!({"churn": 3.0}),
                metadata: Value::Null,
                timestamp: None,
            },
            RawAnalyticsEvent {
                source: None,
                kind: Some("coverage".to_string()),
                value: None,
                unit: None,
                metrics: Value::Null,
                metadata: Value::Null,
                timestamp: None,
            },
        ];
        let summary = buffer.ingest(events, &metrics(), false).unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.total_events, 1);
    }

    #[test]
    fn rankings_fall_back_to_synthetic_when_empty() {
        let buffer = AnalyticsBuffer::default();
        let entries = rankings(&buffer, "churn", 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rationale, "synthetic_hotspot");
    }

    #[test]
    fn rankings_use_ingested_signals_when_present() {
        let buffer = AnalyticsBuffer::default();
        buffer
            .ingest(
                vec![RawAnalyticsEvent {
                    source: Some("src/hot.rs".to_string()),
                    kind: Some("coverage".to_string()),
                    value: None,
                    unit: None,
                    metrics: serde_json::json!({"churn": 10.0, "coverage": 0.1}),
                    metadata: Value::Null,
                    timestamp: None,
                }],
                &metrics(),
                false,
            )
            .unwrap();
        let entries = rankings(&buffer, "churn", 5);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "src/hot.rs");
        assert_ne!(entries[0].rationale, "synthetic_hotspot");
    }
}
