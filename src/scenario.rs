use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Static scenario description written by the orchestration layer
/// (`scenario.toml`). Only the participant list is interpreted here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub participants: Vec<ScenarioParticipant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioParticipant {
    pub name: Option<String>,
    pub agentbeats_id: Option<String>,
}

impl Scenario {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse scenario toml")
    }

    /// First participant's `agentbeats_id`, falling back to its `name`.
    pub fn primary_participant_id(&self) -> Option<String> {
        let participant = self.participants.first()?;
        [&participant.agentbeats_id, &participant.name]
            .into_iter()
            .flatten()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Scenario::parse(&raw).with_context(|| format!("invalid scenario file {}", path.display()))
}

/// Whole scenario as JSON, for provenance snapshots.
pub fn load_scenario_snapshot(path: &Path) -> Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let table: toml::Table =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    serde_json::to_value(table)
        .with_context(|| format!("failed to convert {} to json", path.display()))
}

#[cfg(test)]
mod tests {
    use super::Scenario;

    #[test]
    fn primary_participant_prefers_agentbeats_id() {
        let scenario = Scenario::parse(
            r#"
            [green_agent]
            agentbeats_id = "green-1"

            [[participants]]
            name = "medical_agent"
            agentbeats_id = "019a-purple"

            [[participants]]
            name = "second"
            "#,
        )
        .expect("scenario should parse");

        assert_eq!(
            scenario.primary_participant_id().as_deref(),
            Some("019a-purple")
        );
    }

    #[test]
    fn primary_participant_falls_back_to_name() {
        let scenario = Scenario::parse(
            r#"
            [[participants]]
            name = "medical_agent"
            agentbeats_id = ""
            "#,
        )
        .expect("scenario should parse");

        assert_eq!(
            scenario.primary_participant_id().as_deref(),
            Some("medical_agent")
        );
    }

    #[test]
    fn scenario_without_participants_resolves_nothing() {
        let scenario = Scenario::parse("[config]\ndomain = \"medical\"\n").expect("should parse");
        assert!(scenario.primary_participant_id().is_none());
    }
}
