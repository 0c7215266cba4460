use std::fmt;

use serde_json::{Map, Value};

use crate::error::{NormalizeError, NormalizeResult};

const EVALUATION_ARTIFACT_NAME: &str = "Evaluation Result";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShapeTag {
    DirectMetrics,
    BatchAggregate,
    TaskOutcomeList,
}

impl ShapeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectMetrics => "direct_metrics",
            Self::BatchAggregate => "batch_aggregate",
            Self::TaskOutcomeList => "task_outcome_list",
        }
    }
}

impl fmt::Display for ShapeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level split of a raw document: either a batch of inner payloads or a
/// single bare payload.
#[derive(Debug)]
pub enum RawPayload<'a> {
    Enveloped {
        outer: &'a Map<String, Value>,
        entries: Vec<&'a Value>,
    },
    Bare(&'a Map<String, Value>),
}

/// One payload together with the containers it was found in.
#[derive(Debug, Clone, Copy)]
pub struct PayloadFrame<'a> {
    /// Enveloping document, or the bare document itself when it carries a
    /// participant mapping.
    pub outer: Option<&'a Map<String, Value>>,
    /// Run wrapper holding `result_data` plus sibling `config`.
    pub wrapper: Option<&'a Map<String, Value>>,
    /// Innermost payload carrying the metric markers.
    pub payload: &'a Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectMetrics {
    pub score: Option<f64>,
    pub success_rate: Option<f64>,
    pub accuracy: Option<f64>,
    pub hallucination_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchCounters {
    pub total_tasks: f64,
    pub correct_tasks: f64,
    pub failed_tasks: Option<f64>,
}

/// Shape tag plus the flat metrics bag extracted for it.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape<'a> {
    DirectMetrics(DirectMetrics),
    BatchAggregate(BatchCounters),
    TaskOutcomeList(&'a Map<String, Value>),
}

impl PayloadShape<'_> {
    pub fn tag(&self) -> ShapeTag {
        match self {
            Self::DirectMetrics(_) => ShapeTag::DirectMetrics,
            Self::BatchAggregate(_) => ShapeTag::BatchAggregate,
            Self::TaskOutcomeList(_) => ShapeTag::TaskOutcomeList,
        }
    }
}

pub fn split_envelope(document: &Value) -> NormalizeResult<RawPayload<'_>> {
    let Some(outer) = document.as_object() else {
        return Err(NormalizeError::malformed(format!(
            "document must be a JSON object, found {}",
            json_type_name(document)
        )));
    };

    if let Some(entries) = envelope_entries(outer)? {
        if entries.is_empty() {
            return Err(NormalizeError::malformed("envelope contains no result entries"));
        }
        return Ok(RawPayload::Enveloped { outer, entries });
    }

    Ok(RawPayload::Bare(outer))
}

/// Result entries of an envelope, or `None` when the object is not one.
fn envelope_entries(object: &Map<String, Value>) -> NormalizeResult<Option<Vec<&Value>>> {
    if let Some(results) = object.get("results").and_then(Value::as_array) {
        return Ok(Some(results.iter().collect()));
    }

    let Some(artifacts) = object.get("artifacts").and_then(Value::as_array) else {
        return Ok(None);
    };

    let entries = artifacts
        .iter()
        .filter(|artifact| {
            artifact.get("name").and_then(Value::as_str) == Some(EVALUATION_ARTIFACT_NAME)
        })
        .filter_map(|artifact| artifact.get("parts").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("kind").and_then(Value::as_str) == Some("data"))
        .filter_map(|part| part.get("data"))
        .filter(|data| data.as_object().is_some_and(|data| !data.is_empty()))
        .collect::<Vec<_>>();

    if entries.is_empty() {
        return Err(NormalizeError::malformed(
            "artifact list carries no evaluation result data part",
        ));
    }

    Ok(Some(entries))
}

/// Locates the innermost payload of an envelope entry. Envelopes unwrap once:
/// an entry that is itself an envelope is rejected.
pub fn frame_entry<'a>(
    entry: &'a Value,
    outer: &'a Map<String, Value>,
) -> NormalizeResult<PayloadFrame<'a>> {
    let Some(object) = entry.as_object() else {
        return Err(NormalizeError::malformed(format!(
            "result entry must be a JSON object, found {}",
            json_type_name(entry)
        )));
    };

    if object.get("results").is_some_and(Value::is_array)
        || object.get("artifacts").is_some_and(Value::is_array)
    {
        return Err(NormalizeError::malformed(
            "result entry is itself an envelope; nested envelopes are not unwrapped",
        ));
    }

    Ok(frame_object(object, Some(outer)))
}

pub fn frame_bare(document: &Map<String, Value>) -> PayloadFrame<'_> {
    let outer = document
        .get("participants")
        .filter(|participants| participants.is_object() || participants.is_array())
        .map(|_| document);
    frame_object(document, outer)
}

fn frame_object<'a>(
    object: &'a Map<String, Value>,
    outer: Option<&'a Map<String, Value>>,
) -> PayloadFrame<'a> {
    match object.get("result_data").and_then(Value::as_object) {
        Some(result_data) => PayloadFrame {
            outer,
            wrapper: Some(object),
            payload: result_data,
        },
        None => PayloadFrame {
            outer,
            wrapper: None,
            payload: object,
        },
    }
}

/// Classifies an innermost payload. Detectors run in fixed order and the
/// first structural match wins: explicit metrics, then batch counters, then
/// per-task outcomes.
pub fn resolve_shape(payload: &Map<String, Value>) -> NormalizeResult<PayloadShape<'_>> {
    if let Some(direct) = detect_direct_metrics(payload)? {
        return Ok(PayloadShape::DirectMetrics(direct));
    }
    if let Some(counters) = detect_batch_aggregate(payload)? {
        return Ok(PayloadShape::BatchAggregate(counters));
    }
    if let Some(outcomes) = detect_task_outcomes(payload) {
        return Ok(PayloadShape::TaskOutcomeList(outcomes));
    }

    let mut keys = payload.keys().map(String::as_str).collect::<Vec<_>>();
    keys.truncate(12);
    Err(NormalizeError::malformed(format!(
        "no known payload shape matched (keys: [{}])",
        keys.join(", ")
    )))
}

fn detect_direct_metrics(payload: &Map<String, Value>) -> NormalizeResult<Option<DirectMetrics>> {
    if !has_value(payload, "score") && !has_value(payload, "accuracy") {
        return Ok(None);
    }

    let nested_success_rate = match payload.get("report").and_then(Value::as_object) {
        Some(report) => number_field(report, "success_rate", "report.success_rate")?,
        None => None,
    };
    let success_rate = match nested_success_rate {
        Some(value) => Some(value),
        None => number_field(payload, "success_rate", "success_rate")?,
    };

    Ok(Some(DirectMetrics {
        score: number_field(payload, "score", "score")?,
        success_rate,
        accuracy: number_field(payload, "accuracy", "accuracy")?,
        hallucination_rate: number_field(payload, "hallucination_rate", "hallucination_rate")?,
    }))
}

fn detect_batch_aggregate(payload: &Map<String, Value>) -> NormalizeResult<Option<BatchCounters>> {
    let Some(batch_info) = payload.get("batch_info").and_then(Value::as_object) else {
        return Ok(None);
    };
    if !has_value(batch_info, "total_tasks") || !has_value(batch_info, "correct_tasks") {
        return Ok(None);
    }

    let total_tasks = number_field(batch_info, "total_tasks", "batch_info.total_tasks")?;
    let correct_tasks = number_field(batch_info, "correct_tasks", "batch_info.correct_tasks")?;
    let failed_tasks = number_field(batch_info, "failed_tasks", "batch_info.failed_tasks")?;

    match (total_tasks, correct_tasks) {
        (Some(total_tasks), Some(correct_tasks)) => Ok(Some(BatchCounters {
            total_tasks,
            correct_tasks,
            failed_tasks,
        })),
        _ => Ok(None),
    }
}

fn detect_task_outcomes(payload: &Map<String, Value>) -> Option<&Map<String, Value>> {
    payload
        .get("batch_info")
        .and_then(Value::as_object)
        .and_then(|batch_info| batch_info.get("task_results"))
        .and_then(Value::as_object)
        .or_else(|| payload.get("task_results").and_then(Value::as_object))
}

fn has_value(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).is_some_and(|value| !value.is_null())
}

fn number_field(
    object: &Map<String, Value>,
    key: &str,
    label: &str,
) -> NormalizeResult<Option<f64>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_f64().map(Some).ok_or_else(|| {
            NormalizeError::malformed(format!("`{label}` is not representable as f64"))
        }),
        Some(other) => Err(NormalizeError::malformed(format!(
            "`{label}` must be a number, found {}",
            json_type_name(other)
        ))),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
