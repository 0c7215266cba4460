use serde_json::{Map, Value};
use tracing::debug;

use super::NormalizeContext;
use super::fields::{normalize_timestamp, resolve_fields};
use super::metrics::{compute_metrics, unit_interval};
use super::shape::{PayloadFrame, PayloadShape};
use crate::error::{NormalizeError, NormalizeResult};
use crate::model::{CanonicalMetrics, CanonicalResult, Subtask};

/// Assembles one canonical record from a classified payload and validates it.
pub fn build_record(
    frame: &PayloadFrame<'_>,
    shape: &PayloadShape<'_>,
    context: &NormalizeContext,
) -> NormalizeResult<CanonicalResult> {
    let fields = resolve_fields(frame, context)?;
    let metrics = compute_metrics(fields.subtask, shape)?;

    let record = CanonicalResult {
        subtask: fields.subtask,
        participant_id: fields.participant_id,
        timestamp: fields.timestamp,
        metrics,
        config: config_snapshot(frame),
    };

    validate_record(&record)?;
    Ok(record)
}

/// Post-assembly invariants. Also applied to records read back from a store.
pub fn validate_record(record: &CanonicalResult) -> NormalizeResult<()> {
    if record.participant_id.trim().is_empty() {
        return Err(NormalizeError::validation("participant_id is empty"));
    }
    if record.timestamp.trim().is_empty() {
        return Err(NormalizeError::validation("timestamp is empty"));
    }
    normalize_timestamp(&record.timestamp)?;

    if record.primary_metric().is_none() {
        return Err(NormalizeError::validation(format!(
            "{} record carries no `{}` metric",
            record.subtask,
            record.subtask.primary_metric_name()
        )));
    }

    if let Some(foreign) = foreign_metric(record.subtask, &record.metrics) {
        return Err(NormalizeError::validation(format!(
            "metric `{foreign}` does not belong to {}",
            record.subtask
        )));
    }

    for (name, value) in record.metrics.entries() {
        let clamped = unit_interval(name, value)
            .map_err(|err| NormalizeError::validation(err.to_string()))?;
        if clamped != value {
            return Err(NormalizeError::validation(format!(
                "{name} = {value} lies outside [0.0, 1.0]"
            )));
        }
    }

    Ok(())
}

fn foreign_metric(subtask: Subtask, metrics: &CanonicalMetrics) -> Option<&'static str> {
    match subtask {
        Subtask::Subtask1 => [
            ("accuracy", metrics.accuracy),
            ("hallucination_rate", metrics.hallucination_rate),
        ],
        Subtask::Subtask2 => [
            ("score", metrics.score),
            ("success_rate", metrics.success_rate),
        ],
    }
    .into_iter()
    .find_map(|(name, value)| value.map(|_| name))
}

fn config_snapshot(frame: &PayloadFrame<'_>) -> Value {
    let config = [frame.wrapper, Some(frame.payload)]
        .into_iter()
        .flatten()
        .find_map(|object| object.get("config").filter(|config| !config.is_null()));

    match config {
        Some(Value::Object(config)) => Value::Object(config.clone()),
        Some(other) => {
            debug!(config = %other, "ignoring non-object config");
            Value::Object(Map::new())
        }
        None => Value::Object(Map::new()),
    }
}
