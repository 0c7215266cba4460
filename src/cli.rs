use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::Subtask;

#[derive(Parser, Debug)]
#[command(
    name = "medbench-leaderboard",
    version,
    about = "Normalize evaluation results and rank them into a leaderboard"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Normalize one raw evaluation payload into canonical records.
    Adapt(AdaptArgs),
    /// Rank the stored results, best record per participant and subtask.
    Leaderboard(LeaderboardArgs),
    /// Build an enveloped payload from a framework's raw output.
    Submission(SubmissionArgs),
    /// Record provenance for an assessment run.
    Provenance(ProvenanceArgs),
    /// Summarize the result store.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AdaptArgs {
    pub input: PathBuf,

    pub output: PathBuf,

    /// Exit non-zero when any inner record is rejected.
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub scenario: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Also append the built records to this result store directory.
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueryEngine {
    Memory,
    Sqlite,
}

#[derive(Args, Debug, Clone)]
pub struct LeaderboardArgs {
    #[arg(long, default_value = ".cache/leaderboard/results")]
    pub results_dir: PathBuf,

    #[arg(long, value_enum)]
    pub subtask: Option<Subtask>,

    #[arg(long, value_enum, default_value_t = QueryEngine::Memory)]
    pub engine: QueryEngine,

    /// SQLite file for the sqlite engine; in-memory when omitted.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub overall: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Framework {
    Auto,
    Agentify,
    FhirEval,
    Agentbeats,
}

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Agentify => "agentify",
            Self::FhirEval => "fhir-eval",
            Self::Agentbeats => "agentbeats",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubmissionArgs {
    pub input: PathBuf,

    pub participant_id: String,

    #[arg(long, value_enum, default_value_t = Framework::Auto)]
    pub framework: Framework,

    /// Write the payload here instead of stdout.
    #[arg(long)]
    pub save: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ProvenanceArgs {
    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value = "agentbeats-workflow")]
    pub assessment_id: String,

    #[arg(long)]
    pub results: PathBuf,

    #[arg(long)]
    pub scenario: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/leaderboard/results")]
    pub results_dir: PathBuf,
}
