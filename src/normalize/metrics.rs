use serde_json::{Map, Value};

use super::shape::{BatchCounters, DirectMetrics, PayloadShape, json_type_name};
use crate::error::{NormalizeError, NormalizeResult};
use crate::model::{CanonicalMetrics, Subtask};

/// Slack for float noise at the interval edges; anything further out is an error.
const UNIT_INTERVAL_TOLERANCE: f64 = 1e-9;

pub fn compute_metrics(
    subtask: Subtask,
    shape: &PayloadShape<'_>,
) -> NormalizeResult<CanonicalMetrics> {
    match shape {
        PayloadShape::DirectMetrics(direct) => direct_metrics(subtask, direct),
        PayloadShape::BatchAggregate(counters) => {
            Ok(derived_metrics(subtask, batch_ratio(counters)?))
        }
        PayloadShape::TaskOutcomeList(outcomes) => {
            Ok(derived_metrics(subtask, outcome_ratio(outcomes)?))
        }
    }
}

fn direct_metrics(subtask: Subtask, direct: &DirectMetrics) -> NormalizeResult<CanonicalMetrics> {
    let metrics = match subtask {
        Subtask::Subtask1 => CanonicalMetrics {
            score: checked_unit("score", direct.score)?,
            success_rate: checked_unit("success_rate", direct.success_rate)?,
            ..CanonicalMetrics::default()
        },
        Subtask::Subtask2 => CanonicalMetrics {
            accuracy: checked_unit("accuracy", direct.accuracy)?,
            hallucination_rate: checked_unit("hallucination_rate", direct.hallucination_rate)?,
            ..CanonicalMetrics::default()
        },
    };
    Ok(metrics)
}

/// Metrics for shapes where only a correct/total ratio is known. The rate
/// that cannot be derived (`hallucination_rate`) stays absent.
fn derived_metrics(subtask: Subtask, ratio: f64) -> CanonicalMetrics {
    match subtask {
        Subtask::Subtask1 => CanonicalMetrics {
            score: Some(ratio),
            success_rate: Some(ratio),
            ..CanonicalMetrics::default()
        },
        Subtask::Subtask2 => CanonicalMetrics {
            accuracy: Some(ratio),
            ..CanonicalMetrics::default()
        },
    }
}

fn batch_ratio(counters: &BatchCounters) -> NormalizeResult<f64> {
    let total = task_counter("total_tasks", counters.total_tasks)?;
    let correct = task_counter("correct_tasks", counters.correct_tasks)?;
    let failed = counters
        .failed_tasks
        .map(|failed| task_counter("failed_tasks", failed))
        .transpose()?
        .unwrap_or(0.0);

    if correct + failed > total {
        return Err(NormalizeError::metric(format!(
            "correct_tasks ({correct}) + failed_tasks ({failed}) exceed total_tasks ({total})"
        )));
    }
    if total == 0.0 {
        return Err(NormalizeError::metric(
            "total_tasks is zero; score is undefined",
        ));
    }

    unit_interval("correct ratio", correct / total)
}

fn outcome_ratio(outcomes: &Map<String, Value>) -> NormalizeResult<f64> {
    if outcomes.is_empty() {
        return Err(NormalizeError::metric(
            "task outcome mapping is empty; score is undefined",
        ));
    }

    let mut correct = 0_usize;
    for (task_id, outcome) in outcomes {
        let Some(record) = outcome.as_object() else {
            return Err(NormalizeError::metric(format!(
                "outcome for task `{task_id}` must be an object, found {}",
                json_type_name(outcome)
            )));
        };
        if record.get("failure_type").is_none_or(Value::is_null) {
            correct += 1;
        }
    }

    unit_interval("correct ratio", correct as f64 / outcomes.len() as f64)
}

/// Task counters are whole, non-negative numbers.
fn task_counter(name: &str, value: f64) -> NormalizeResult<f64> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(NormalizeError::metric(format!(
            "{name} must be a non-negative whole count, found {value}"
        )));
    }
    Ok(value)
}

fn checked_unit(name: &str, value: Option<f64>) -> NormalizeResult<Option<f64>> {
    value.map(|value| unit_interval(name, value)).transpose()
}

/// Clamps `value` into [0, 1] when it lies within tolerance of the interval.
pub(crate) fn unit_interval(name: &str, value: f64) -> NormalizeResult<f64> {
    if !value.is_finite() {
        return Err(NormalizeError::metric(format!("{name} is not finite")));
    }
    if !(-UNIT_INTERVAL_TOLERANCE..=1.0 + UNIT_INTERVAL_TOLERANCE).contains(&value) {
        return Err(NormalizeError::metric(format!(
            "{name} = {value} lies outside [0.0, 1.0]"
        )));
    }
    Ok(value.clamp(0.0, 1.0))
}
