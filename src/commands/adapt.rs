use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cli::AdaptArgs;
use crate::model::{AdaptRunReport, AdaptedSubmission, RecordFailureEntry};
use crate::normalize::{NormalizeContext, NormalizeOutcome, RecordFailure, normalize_document};
use crate::scenario::load_scenario;
use crate::store::{DirectoryStore, ResultStore};
use crate::util::{
    now_utc_string, read_json_value, sha256_file, utc_compact_string, write_json_pretty,
};

const DEFAULT_SCENARIO_PATH: &str = "scenario.toml";

pub fn run(args: AdaptArgs) -> Result<()> {
    let run_id = format!("adapt-{}", utc_compact_string(Utc::now()));
    info!(
        run_id = %run_id,
        input = %args.input.display(),
        output = %args.output.display(),
        strict = args.strict,
        "starting adapt"
    );

    let context = NormalizeContext::with_fallback_participant(scenario_participant(
        args.scenario.as_deref(),
    )?);

    let document = read_json_value(&args.input)?;
    let input_sha256 = sha256_file(&args.input)?;

    let mut report = AdaptRunReport {
        manifest_version: 1,
        run_id,
        generated_at: now_utc_string(),
        status: "failed".to_string(),
        strict: args.strict,
        input_path: args.input.display().to_string(),
        input_sha256,
        output_path: None,
        stored_path: None,
        inner_payload_count: 0,
        records_written: 0,
        failure_count: 0,
        failures: Vec::new(),
    };

    let outcome = match normalize_document(&document, &context) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(kind = err.kind(), reason = %err, "payload rejected outright");
            report.failure_count = 1;
            report.failures.push(RecordFailureEntry {
                index: None,
                shape: None,
                kind: err.kind().to_string(),
                reason: err.to_string(),
            });
            write_report(args.report_path.as_deref(), &report)?;
            return Err(err).with_context(|| format!("cannot adapt {}", args.input.display()));
        }
    };

    info!(
        enveloped = outcome.enveloped,
        payloads = outcome.payload_count,
        records = outcome.records.len(),
        rejected = outcome.failures.len(),
        "normalized input document"
    );
    report.inner_payload_count = outcome.payload_count;
    report.failure_count = outcome.failures.len();
    report.failures = outcome.failures.iter().map(failure_entry).collect();

    if outcome.records.is_empty() {
        write_report(args.report_path.as_deref(), &report)?;
        bail!(
            "no canonical record could be built from {} ({} payload(s) rejected)",
            args.input.display(),
            outcome.failures.len()
        );
    }

    if args.strict && !outcome.is_complete() {
        write_report(args.report_path.as_deref(), &report)?;
        bail!(
            "{} of {} payload(s) rejected in strict mode; nothing written",
            outcome.failures.len(),
            outcome.payload_count
        );
    }

    let submission = AdaptedSubmission {
        participants: envelope_participants(&document),
        results: outcome.records.clone(),
    };

    write_json_pretty(&args.output, &submission)?;
    report.output_path = Some(args.output.display().to_string());
    report.records_written = submission.results.len();

    if let Some(results_dir) = &args.results_dir {
        let mut store = DirectoryStore::new(results_dir);
        report.stored_path = Some(store.append(&submission)?);
    }

    report.status = status_label(&outcome).to_string();
    write_report(args.report_path.as_deref(), &report)?;

    for record in &submission.results {
        info!(
            subtask = %record.subtask,
            participant_id = %record.participant_id,
            timestamp = %record.timestamp,
            metrics = ?record.metrics.entries(),
            "canonical record"
        );
    }
    info!(
        path = %args.output.display(),
        records = report.records_written,
        rejected = report.failure_count,
        status = %report.status,
        "adapt completed"
    );

    Ok(())
}

fn scenario_participant(explicit: Option<&Path>) -> Result<Option<String>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SCENARIO_PATH);
            if !default.exists() {
                return Ok(None);
            }
            default
        }
    };

    let participant = load_scenario(&path)?.primary_participant_id();
    info!(
        path = %path.display(),
        participant = %participant.as_deref().unwrap_or(""),
        "loaded scenario"
    );
    Ok(participant)
}

fn envelope_participants(document: &Value) -> Map<String, Value> {
    document
        .get("participants")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn failure_entry(failure: &RecordFailure) -> RecordFailureEntry {
    RecordFailureEntry {
        index: failure.index,
        shape: failure.shape.map(|shape| shape.as_str().to_string()),
        kind: failure.error.kind().to_string(),
        reason: failure.error.to_string(),
    }
}

fn status_label(outcome: &NormalizeOutcome) -> &'static str {
    if outcome.is_complete() {
        "complete"
    } else {
        "partial"
    }
}

fn write_report(path: Option<&Path>, report: &AdaptRunReport) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    write_json_pretty(path, report)?;
    info!(path = %path.display(), "wrote adapt run report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn write_input(dir: &Path, document: &Value) -> PathBuf {
        let path = dir.join("input.json");
        fs::write(&path, serde_json::to_vec_pretty(document).expect("serialize"))
            .expect("input should be written");
        path
    }

    fn args(dir: &Path, input: PathBuf, strict: bool) -> AdaptArgs {
        AdaptArgs {
            input,
            output: dir.join("out").join("results.json"),
            strict,
            scenario: Some(dir.join("scenario.toml")),
            report_path: Some(dir.join("report.json")),
            results_dir: Some(dir.join("store")),
        }
    }

    fn batch_with_one_invalid() -> Value {
        json!({
            "participants": {"medical_agent": "agent-7"},
            "results": [
                {"subtask": "subtask1", "score": 0.8, "timestamp": "2025-06-01T00:00:00Z"},
                {"subtask": "subtask2", "score": 0.9, "timestamp": "2025-06-01T00:00:00Z"},
                {"subtask": "subtask2", "accuracy": 0.7, "timestamp": "2025-06-01T00:00:00Z"}
            ]
        })
    }

    #[test]
    fn partial_success_writes_valid_records_and_reports_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("scenario.toml"), "").expect("scenario");
        let input = write_input(dir.path(), &batch_with_one_invalid());
        let args = args(dir.path(), input, false);

        run(args.clone()).expect("non-strict adapt should succeed");

        let written = read_json_value(&args.output).expect("output should exist");
        let submission: AdaptedSubmission =
            serde_json::from_value(written).expect("output should be a submission");
        assert_eq!(submission.results.len(), 2);
        assert_eq!(submission.participants["medical_agent"], "agent-7");
        assert!(
            submission
                .results
                .iter()
                .all(|record| record.participant_id == "agent-7")
        );

        let report = read_json_value(&dir.path().join("report.json")).expect("report");
        assert_eq!(report["status"], "partial");
        assert_eq!(report["records_written"], 2);
        assert_eq!(report["failures"][0]["index"], 1);
        assert_eq!(report["failures"][0]["shape"], "direct_metrics");
        assert_eq!(report["failures"][0]["kind"], "validation");

        let store = DirectoryStore::new(dir.path().join("store"));
        assert_eq!(store.load_all().expect("store load").len(), 2);
    }

    #[test]
    fn strict_mode_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("scenario.toml"), "").expect("scenario");
        let input = write_input(dir.path(), &batch_with_one_invalid());
        let args = args(dir.path(), input, true);

        assert!(run(args.clone()).is_err());
        assert!(!args.output.exists());
        assert!(!dir.path().join("store").exists());

        let report = read_json_value(&dir.path().join("report.json")).expect("report");
        assert_eq!(report["status"], "failed");
        assert_eq!(report["failure_count"], 1);
    }

    #[test]
    fn zero_denominator_writes_no_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("scenario.toml"), "").expect("scenario");
        let input = write_input(
            dir.path(),
            &json!({
                "participant_id": "agent-1",
                "batch_info": {"total_tasks": 0, "correct_tasks": 0}
            }),
        );
        let args = args(dir.path(), input, false);

        assert!(run(args.clone()).is_err());
        assert!(!args.output.exists());

        let report = read_json_value(&dir.path().join("report.json")).expect("report");
        assert_eq!(report["failures"][0]["kind"], "metric_computation");
        assert_eq!(report["failures"][0]["shape"], "batch_aggregate");
    }

    #[test]
    fn scenario_supplies_missing_participant() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("scenario.toml"),
            "[[participants]]\nname = \"medical_agent\"\nagentbeats_id = \"scenario-agent\"\n",
        )
        .expect("scenario");
        let input = write_input(
            dir.path(),
            &json!({"result_data": {"subtask": "subtask1", "score": 0.5}, "config": {"domain": "medical"}}),
        );
        let args = args(dir.path(), input, true);

        run(args.clone()).expect("adapt should succeed");

        let written = read_json_value(&args.output).expect("output");
        assert_eq!(written["results"][0]["participant_id"], "scenario-agent");
        assert_eq!(written["results"][0]["config"]["domain"], "medical");
    }
}
