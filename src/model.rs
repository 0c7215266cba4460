use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Subtask {
    Subtask1,
    Subtask2,
}

impl Subtask {
    pub const ALL: [Subtask; 2] = [Subtask::Subtask1, Subtask::Subtask2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subtask1 => "subtask1",
            Self::Subtask2 => "subtask2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "subtask1" => Some(Self::Subtask1),
            "subtask2" => Some(Self::Subtask2),
            _ => None,
        }
    }

    /// Column the leaderboard orders this subtask by.
    pub fn primary_metric_name(self) -> &'static str {
        match self {
            Self::Subtask1 => "score",
            Self::Subtask2 => "accuracy",
        }
    }
}

impl fmt::Display for Subtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric columns of a canonical record. Absent metrics stay `None` and are
/// not serialized; nothing is coalesced to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucination_rate: Option<f64>,
}

impl CanonicalMetrics {
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        [
            ("score", self.score),
            ("success_rate", self.success_rate),
            ("accuracy", self.accuracy),
            ("hallucination_rate", self.hallucination_rate),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub subtask: Subtask,
    pub participant_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub metrics: CanonicalMetrics,
    #[serde(default = "empty_config")]
    pub config: Value,
}

impl CanonicalResult {
    pub fn primary_metric(&self) -> Option<f64> {
        match self.subtask {
            Subtask::Subtask1 => self.metrics.score,
            Subtask::Subtask2 => self.metrics.accuracy,
        }
    }
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

/// Document written by the adapter: the passthrough participant mapping and
/// every record built from the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptedSubmission {
    #[serde(default)]
    pub participants: Map<String, Value>,
    pub results: Vec<CanonicalResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub subtask: Subtask,
    pub participant_id: String,
    pub primary_metric: f64,
    pub record: CanonicalResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallStanding {
    pub rank: usize,
    pub participant_id: String,
    pub mean_primary_metric: f64,
    pub subtask_count: usize,
    pub latest_timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailureEntry {
    pub index: Option<usize>,
    pub shape: Option<String>,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdaptRunReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub status: String,
    pub strict: bool,
    pub input_path: String,
    pub input_sha256: String,
    pub output_path: Option<String>,
    pub stored_path: Option<String>,
    pub inner_payload_count: usize,
    pub records_written: usize,
    pub failure_count: usize,
    pub failures: Vec<RecordFailureEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary {
    pub total_participants: usize,
    pub results_file: String,
    pub results_sha256: String,
    pub has_results: bool,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceMetadata {
    pub generator: String,
    pub version: String,
    pub benchmark: String,
    pub subtasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceRecord {
    pub assessment_id: String,
    pub timestamp: String,
    pub agentbeats_ids: Vec<String>,
    pub scenario_config: Value,
    pub results_summary: ResultsSummary,
    pub metadata: ProvenanceMetadata,
}
