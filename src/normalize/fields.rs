use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use super::NormalizeContext;
use super::shape::PayloadFrame;
use crate::error::{NormalizeError, NormalizeResult};
use crate::model::Subtask;

const UNKNOWN_PARTICIPANT: &str = "unknown";

/// Identity fields of one record. Each is resolved by its own chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFields {
    pub participant_id: String,
    pub subtask: Subtask,
    pub timestamp: String,
}

type Strategy = (
    &'static str,
    fn(&PayloadFrame<'_>, &NormalizeContext) -> Option<String>,
);

const PARTICIPANT_CHAIN: &[Strategy] = &[
    ("envelope_participants", participant_from_envelope),
    ("explicit_participant_id", participant_from_payload),
    ("scenario_config", participant_from_context),
];

const SUBTASK_CHAIN: &[Strategy] = &[
    ("payload_subtask", subtask_from_payload),
    ("config_subtask", subtask_from_config),
    ("task_id_prefix", subtask_from_task_id),
];

const TIMESTAMP_CHAIN: &[Strategy] = &[
    ("envelope_timestamp", timestamp_from_envelope),
    ("payload_timestamp", timestamp_from_payload),
];

pub fn resolve_fields(
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> NormalizeResult<ResolvedFields> {
    Ok(ResolvedFields {
        participant_id: resolve_participant(frame, context)?,
        subtask: resolve_subtask(frame, context)?,
        timestamp: resolve_timestamp(frame, context)?,
    })
}

pub fn resolve_participant(
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> NormalizeResult<String> {
    run_chain("participant_id", PARTICIPANT_CHAIN, frame, context).ok_or_else(|| {
        NormalizeError::missing(
            "participant_id",
            "no envelope participant, explicit participant_id or scenario participant",
        )
    })
}

pub fn resolve_subtask(
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> NormalizeResult<Subtask> {
    let Some(raw) = run_chain("subtask", SUBTASK_CHAIN, frame, context) else {
        debug!(field = "subtask", source = "default", "falling back to subtask1");
        return Ok(Subtask::Subtask1);
    };

    Subtask::parse(&raw)
        .ok_or_else(|| NormalizeError::validation(format!("unrecognized subtask `{raw}`")))
}

pub fn resolve_timestamp(
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> NormalizeResult<String> {
    match run_chain("timestamp", TIMESTAMP_CHAIN, frame, context) {
        Some(raw) => normalize_timestamp(&raw),
        None => {
            debug!(field = "timestamp", source = "clock", "generating timestamp");
            Ok(format_timestamp((context.clock)()))
        }
    }
}

fn run_chain(
    field: &'static str,
    chain: &[Strategy],
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> Option<String> {
    for (source, strategy) in chain {
        match strategy(frame, context) {
            Some(value) => {
                debug!(field, source, value = %value, "field resolved");
                return Some(value);
            }
            None => debug!(field, source, "source unavailable"),
        }
    }
    None
}

fn participant_from_envelope(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    let participants = frame.outer?.get("participants")?;

    match participants {
        Value::Object(mapping) => {
            if mapping.len() > 1 {
                debug!(
                    count = mapping.len(),
                    "multiple envelope participants, taking the first"
                );
            }
            mapping.values().next().and_then(participant_token)
        }
        Value::Array(list) => list.first().and_then(participant_token),
        _ => None,
    }
}

fn participant_token(value: &Value) -> Option<String> {
    match value {
        Value::Object(entry) => ["agentbeats_id", "id", "name"]
            .into_iter()
            .find_map(|key| entry.get(key).and_then(text_value)),
        other => text_value(other),
    }
    .filter(|value| value != UNKNOWN_PARTICIPANT)
}

fn participant_from_payload(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    [Some(frame.payload), frame.wrapper, frame.outer]
        .into_iter()
        .flatten()
        .filter_map(|object| object.get("participant_id").and_then(text_value))
        .find(|value| value != UNKNOWN_PARTICIPANT)
}

fn participant_from_context(_: &PayloadFrame<'_>, context: &NormalizeContext) -> Option<String> {
    context
        .fallback_participant
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != UNKNOWN_PARTICIPANT)
        .map(ToOwned::to_owned)
}

fn subtask_from_payload(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    frame.payload.get("subtask").and_then(text_value)
}

fn subtask_from_config(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    [frame.wrapper, Some(frame.payload)]
        .into_iter()
        .flatten()
        .filter_map(|object| object.get("config").and_then(Value::as_object))
        .find_map(|config| config.get("subtask").and_then(text_value))
}

fn subtask_from_task_id(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    let task_id = frame.payload.get("task_id").and_then(text_value)?;
    task_id
        .to_ascii_lowercase()
        .starts_with("subtask2")
        .then(|| Subtask::Subtask2.as_str().to_string())
}

fn timestamp_from_envelope(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    [frame.outer, frame.wrapper]
        .into_iter()
        .flatten()
        .find_map(|object| object.get("timestamp").and_then(text_value))
}

fn timestamp_from_payload(frame: &PayloadFrame<'_>, _: &NormalizeContext) -> Option<String> {
    frame.payload.get("timestamp").and_then(text_value)
}

/// Non-empty textual form of a scalar. Null and blank strings are absent.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Array(_) | Value::Object(_) => None,
        other => Some(other.to_string()),
    }
}

/// Canonical timestamp form: UTC, RFC 3339, fixed microsecond precision, so
/// lexical order matches chronological order. Naive timestamps are read as UTC.
pub fn normalize_timestamp(raw: &str) -> NormalizeResult<String> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(format_timestamp(parsed.with_timezone(&Utc)));
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Ok(format_timestamp(parsed.and_utc()));
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(format_timestamp(midnight.and_utc()));
    }

    Err(NormalizeError::validation(format!(
        "timestamp `{raw}` is not ISO-8601"
    )))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
