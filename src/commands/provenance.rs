use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cli::ProvenanceArgs;
use crate::model::{ProvenanceMetadata, ProvenanceRecord, ResultsSummary, Subtask};
use crate::scenario::load_scenario_snapshot;
use crate::util::{now_utc_string, read_json_value, sha256_file, write_json_pretty};

const DEFAULT_SCENARIO_PATH: &str = "scenario.toml";

pub fn run(args: ProvenanceArgs) -> Result<()> {
    let scenario_path = args
        .scenario
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCENARIO_PATH));

    let scenario_config = if scenario_path.exists() {
        load_scenario_snapshot(&scenario_path)?
    } else {
        warn!(path = %scenario_path.display(), "scenario file missing; recording empty config");
        Value::Object(Map::new())
    };

    let results = read_json_value(&args.results)?;
    let record = build_provenance(
        &args.assessment_id,
        scenario_config,
        &args.results,
        &results,
        sha256_file(&args.results)?,
    );

    write_json_pretty(&args.output, &record)?;
    info!(
        path = %args.output.display(),
        assessment_id = %record.assessment_id,
        participants = record.agentbeats_ids.len(),
        "provenance recorded"
    );

    Ok(())
}

pub fn build_provenance(
    assessment_id: &str,
    scenario_config: Value,
    results_path: &Path,
    results: &Value,
    results_sha256: String,
) -> ProvenanceRecord {
    let agentbeats_ids = participant_ids(results.get("participants"));
    let record_count = results
        .get("results")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    ProvenanceRecord {
        assessment_id: assessment_id.to_string(),
        timestamp: now_utc_string(),
        results_summary: ResultsSummary {
            total_participants: agentbeats_ids.len(),
            results_file: results_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            results_sha256,
            has_results: record_count > 0,
            record_count,
        },
        agentbeats_ids,
        scenario_config,
        metadata: ProvenanceMetadata {
            generator: "MedAgentBench Leaderboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            benchmark: "MedAgentBench".to_string(),
            subtasks: Subtask::ALL
                .iter()
                .map(|subtask| subtask.as_str().to_string())
                .collect(),
        },
    }
}

fn participant_ids(participants: Option<&Value>) -> Vec<String> {
    match participants {
        Some(Value::Object(mapping)) => mapping.values().filter_map(id_text).collect(),
        Some(Value::Array(list)) => list
            .iter()
            .map(|entry| {
                ["agentbeats_id", "id"]
                    .into_iter()
                    .find_map(|key| entry.get(key).and_then(id_text))
                    .unwrap_or_else(|| "unknown".to_string())
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn id_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provenance_lists_mapping_participants() {
        let results = json!({
            "participants": {"medical_agent": "agent-1", "helper": "agent-2"},
            "results": [{"subtask": "subtask1"}]
        });

        let record = build_provenance(
            "assessment-42",
            json!({"participants": []}),
            Path::new("output/results.json"),
            &results,
            "abc".to_string(),
        );

        assert_eq!(record.agentbeats_ids, vec!["agent-1", "agent-2"]);
        assert_eq!(record.results_summary.total_participants, 2);
        assert_eq!(record.results_summary.results_file, "results.json");
        assert!(record.results_summary.has_results);
        assert_eq!(record.metadata.subtasks, vec!["subtask1", "subtask2"]);
    }

    #[test]
    fn provenance_reads_participant_lists() {
        let results = json!({
            "participants": [{"agentbeats_id": "a"}, {"id": "b"}, {"name": "c"}],
            "results": []
        });

        let record = build_provenance(
            "run",
            json!({}),
            Path::new("results.json"),
            &results,
            String::new(),
        );

        assert_eq!(record.agentbeats_ids, vec!["a", "b", "unknown"]);
        assert!(!record.results_summary.has_results);
    }
}
