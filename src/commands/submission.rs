use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::cli::{Framework, SubmissionArgs};
use crate::util::{now_utc_string, read_json_value, write_json_pretty};

const PARTICIPANT_ROLE: &str = "medical_agent";

pub fn run(args: SubmissionArgs) -> Result<()> {
    let document = read_json_value(&args.input)?;
    let framework = match args.framework {
        Framework::Auto => detect_framework(&document)
            .with_context(|| format!("could not detect framework of {}", args.input.display()))?,
        explicit => explicit,
    };

    let submission = build_submission(&document, &args.participant_id, framework)?;

    match &args.save {
        Some(path) => {
            write_json_pretty(path, &submission)?;
            info!(path = %path.display(), "saved submission payload");
        }
        None => {
            let mut output = io::BufWriter::new(io::stdout().lock());
            serde_json::to_writer_pretty(&mut output, &submission)
                .context("failed to serialize submission payload")?;
            writeln!(output)?;
            output.flush()?;
        }
    }

    info!(
        framework = framework.as_str(),
        participant_id = %args.participant_id,
        results = submission["results"].as_array().map_or(0, Vec::len),
        "submission generated"
    );
    Ok(())
}

pub fn detect_framework(document: &Value) -> Result<Framework> {
    let Some(object) = document.as_object() else {
        bail!("framework output must be a JSON object");
    };

    if object.contains_key("participants") && object.contains_key("results") {
        return Ok(Framework::Agentbeats);
    }
    if object.contains_key("hallucination_rate") {
        return Ok(Framework::FhirEval);
    }
    if object.contains_key("correct_count") || object.contains_key("pass_rate") {
        return Ok(Framework::Agentify);
    }

    let keys = object.keys().map(String::as_str).collect::<Vec<_>>();
    bail!("no framework markers found (keys: [{}])", keys.join(", "))
}

/// Wraps a framework output into an envelope the adapter accepts.
pub fn build_submission(
    document: &Value,
    participant_id: &str,
    framework: Framework,
) -> Result<Value> {
    if participant_id.trim().is_empty() {
        bail!("participant id must not be empty");
    }

    let results = match framework {
        Framework::Auto => bail!("framework must be resolved before building a submission"),
        Framework::Agentify => vec![agentify_payload(document)?],
        Framework::FhirEval => vec![fhir_eval_payload(document)?],
        Framework::Agentbeats => agentbeats_results(document)?,
    };

    Ok(json!({
        "participants": { PARTICIPANT_ROLE: participant_id },
        "results": results,
    }))
}

fn agentify_payload(document: &Value) -> Result<Value> {
    let mut payload = Map::new();
    payload.insert("subtask".to_string(), json!("subtask1"));
    payload.insert("timestamp".to_string(), json!(now_utc_string()));

    match (document.get("total_tasks"), document.get("correct_count")) {
        (Some(total), Some(correct)) if total.is_number() && correct.is_number() => {
            payload.insert(
                "batch_info".to_string(),
                json!({ "total_tasks": total, "correct_tasks": correct }),
            );
        }
        _ => {
            let Some(pass_rate) = document.get("pass_rate").filter(|value| value.is_number()) else {
                bail!("agentify output carries neither task counters nor pass_rate");
            };
            payload.insert("score".to_string(), pass_rate.clone());
            payload.insert("success_rate".to_string(), pass_rate.clone());
        }
    }

    payload.insert(
        "config".to_string(),
        passthrough_config(document, "agentify-medagentbench", &["time_used"]),
    );
    Ok(Value::Object(payload))
}

fn fhir_eval_payload(document: &Value) -> Result<Value> {
    let mut payload = Map::new();
    payload.insert("subtask".to_string(), json!("subtask2"));
    payload.insert("timestamp".to_string(), json!(now_utc_string()));

    match document.get("accuracy").filter(|value| value.is_number()) {
        Some(accuracy) => {
            payload.insert("accuracy".to_string(), accuracy.clone());
        }
        None => {
            let (Some(total), Some(correct)) = (
                document.get("total_tasks").filter(|value| value.is_number()),
                document.get("correct_answers").filter(|value| value.is_number()),
            ) else {
                bail!("fhir evaluator output carries neither accuracy nor task counters");
            };
            payload.insert(
                "batch_info".to_string(),
                json!({ "total_tasks": total, "correct_tasks": correct }),
            );
        }
    }

    if let Some(rate) = document.get("hallucination_rate").filter(|value| value.is_number()) {
        payload.insert("hallucination_rate".to_string(), rate.clone());
    }

    payload.insert(
        "config".to_string(),
        passthrough_config(
            document,
            "fhiragentevaluator",
            &["avg_precision", "avg_recall", "f1_score", "time_used"],
        ),
    );
    Ok(Value::Object(payload))
}

fn agentbeats_results(document: &Value) -> Result<Vec<Value>> {
    let results = document
        .get("results")
        .and_then(Value::as_array)
        .context("agentbeats output has no results array")?;
    if results.is_empty() {
        bail!("agentbeats output has an empty results array");
    }
    Ok(results.clone())
}

fn passthrough_config(document: &Value, framework: &str, keys: &[&str]) -> Value {
    let mut config = Map::new();
    config.insert("framework".to_string(), json!(framework));
    for key in keys {
        if let Some(value) = document.get(*key).filter(|value| !value.is_null()) {
            config.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Subtask;
    use crate::normalize::{NormalizeContext, normalize_document};

    #[test]
    fn detects_frameworks_from_markers() {
        assert_eq!(
            detect_framework(&json!({"participants": {}, "results": []})).expect("agentbeats"),
            Framework::Agentbeats
        );
        assert_eq!(
            detect_framework(&json!({"accuracy": 0.5, "hallucination_rate": 0.1}))
                .expect("fhir"),
            Framework::FhirEval
        );
        assert_eq!(
            detect_framework(&json!({"total_tasks": 10, "correct_count": 7})).expect("agentify"),
            Framework::Agentify
        );
        assert!(detect_framework(&json!({"unrelated": true})).is_err());
    }

    #[test]
    fn agentify_output_adapts_to_derived_score() {
        let submission = build_submission(
            &json!({"total_tasks": 300, "correct_count": 270, "pass_rate": 0.9, "time_used": 12}),
            "agent-9",
            Framework::Agentify,
        )
        .expect("submission should build");

        let outcome = normalize_document(&submission, &NormalizeContext::default())
            .expect("submission should normalize");
        assert!(outcome.failures.is_empty());
        let record = &outcome.records[0];
        assert_eq!(record.participant_id, "agent-9");
        assert_eq!(record.subtask, Subtask::Subtask1);
        assert_eq!(record.metrics.score, Some(0.9));
        assert_eq!(record.config["framework"], "agentify-medagentbench");
        assert_eq!(record.config["time_used"], 12);
    }

    #[test]
    fn fhir_output_keeps_hallucination_rate_optional() {
        let submission = build_submission(
            &json!({"total_tasks": 50, "correct_answers": 40, "f1_score": 0.7}),
            "agent-3",
            Framework::FhirEval,
        )
        .expect("submission should build");

        let outcome = normalize_document(&submission, &NormalizeContext::default())
            .expect("submission should normalize");
        let record = &outcome.records[0];
        assert_eq!(record.subtask, Subtask::Subtask2);
        assert_eq!(record.metrics.accuracy, Some(0.8));
        assert_eq!(record.metrics.hallucination_rate, None);
    }

    #[test]
    fn empty_participant_is_rejected() {
        assert!(build_submission(&json!({"pass_rate": 0.5}), " ", Framework::Agentify).is_err());
    }
}
