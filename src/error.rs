//! Error taxonomy for payload normalization.

/// Errors produced while turning one raw payload into one canonical record.
///
/// Every variant is scoped to a single record: inside an envelope, a failure
/// rejects that inner record only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("missing required field `{field}`: {reason}")]
    MissingRequiredField { field: &'static str, reason: String },

    #[error("metric computation failed: {reason}")]
    MetricComputation { reason: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },
}

impl NormalizeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub fn missing(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field,
            reason: reason.into(),
        }
    }

    pub fn metric(reason: impl Into<String>) -> Self {
        Self::MetricComputation {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Stable name used in run reports and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::MetricComputation { .. } => "metric_computation",
            Self::Validation { .. } => "validation",
        }
    }
}

pub type NormalizeResult<T> = std::result::Result<T, NormalizeError>;
