//! Result normalization: raw evaluator payloads in, canonical records out.
//!
//! A document is split into inner payloads (one for a bare payload, one per
//! entry for an envelope). Each payload is classified, its identity fields
//! and metrics are resolved independently, and the assembled record is
//! validated. Failures are scoped to the payload that produced them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{NormalizeError, NormalizeResult};
use crate::model::CanonicalResult;

mod builder;
mod fields;
mod metrics;
mod shape;

pub use builder::validate_record;
pub use fields::normalize_timestamp;
pub use shape::ShapeTag;

use builder::build_record;
use shape::{PayloadFrame, RawPayload, frame_bare, frame_entry, resolve_shape, split_envelope};

/// Caller-supplied inputs that are not part of the payload.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    /// Participant from the scenario configuration; last participant fallback.
    pub fallback_participant: Option<String>,
    pub clock: fn() -> DateTime<Utc>,
}

impl Default for NormalizeContext {
    fn default() -> Self {
        Self {
            fallback_participant: None,
            clock: Utc::now,
        }
    }
}

impl NormalizeContext {
    pub fn with_fallback_participant(participant: Option<String>) -> Self {
        Self {
            fallback_participant: participant,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Position inside the envelope; `None` for a bare payload.
    pub index: Option<usize>,
    pub shape: Option<ShapeTag>,
    pub error: NormalizeError,
}

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub enveloped: bool,
    pub payload_count: usize,
    pub records: Vec<CanonicalResult>,
    pub failures: Vec<RecordFailure>,
}

impl NormalizeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Normalizes every payload in `document`.
///
/// Only a document that cannot be split at all (not an object, empty
/// envelope) is an error; per-payload failures are collected in the outcome
/// next to the records that did build.
pub fn normalize_document(
    document: &Value,
    context: &NormalizeContext,
) -> NormalizeResult<NormalizeOutcome> {
    let raw = split_envelope(document)?;

    let mut records = Vec::new();
    let mut failures = Vec::new();

    let (enveloped, payload_count) = match raw {
        RawPayload::Enveloped { outer, entries } => {
            for (index, entry) in entries.iter().enumerate() {
                let built = frame_entry(entry, outer)
                    .map_err(|error| RecordFailure {
                        index: Some(index),
                        shape: None,
                        error,
                    })
                    .and_then(|frame| normalize_frame(Some(index), &frame, context));
                collect(built, &mut records, &mut failures);
            }
            (true, entries.len())
        }
        RawPayload::Bare(document) => {
            let frame = frame_bare(document);
            collect(
                normalize_frame(None, &frame, context),
                &mut records,
                &mut failures,
            );
            (false, 1)
        }
    };

    Ok(NormalizeOutcome {
        enveloped,
        payload_count,
        records,
        failures,
    })
}

fn normalize_frame(
    index: Option<usize>,
    frame: &PayloadFrame<'_>,
    context: &NormalizeContext,
) -> Result<CanonicalResult, RecordFailure> {
    let shape = resolve_shape(frame.payload).map_err(|error| RecordFailure {
        index,
        shape: None,
        error,
    })?;
    let tag = shape.tag();

    build_record(frame, &shape, context).map_err(|error| RecordFailure {
        index,
        shape: Some(tag),
        error,
    })
}

fn collect(
    built: Result<CanonicalResult, RecordFailure>,
    records: &mut Vec<CanonicalResult>,
    failures: &mut Vec<RecordFailure>,
) {
    match built {
        Ok(record) => records.push(record),
        Err(failure) => {
            warn!(
                index = ?failure.index,
                shape = failure.shape.map(ShapeTag::as_str).unwrap_or("unknown"),
                kind = failure.error.kind(),
                reason = %failure.error,
                "payload rejected"
            );
            failures.push(failure);
        }
    }
}
