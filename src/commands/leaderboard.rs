use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::{LeaderboardArgs, QueryEngine};
use crate::model::{OverallStanding, RankedEntry, Subtask};
use crate::ranking::{overall_standings, rank_store};
use crate::store::{DirectoryStore, SqliteStore};

#[derive(Debug, Serialize)]
struct LeaderboardResponse {
    engine: &'static str,
    subtask_filter: Option<Subtask>,
    record_count: usize,
    returned: usize,
    entries: Vec<RankedEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overall: Option<Vec<OverallStanding>>,
}

pub fn run(args: LeaderboardArgs) -> Result<()> {
    let store = DirectoryStore::new(&args.results_dir);
    let stored = store.load_entries()?;

    info!(
        results_dir = %args.results_dir.display(),
        records = stored.len(),
        engine = engine_name(args.engine),
        "leaderboard requested"
    );

    let entries = match args.engine {
        QueryEngine::Memory => {
            let records = stored
                .iter()
                .map(|entry| entry.record.clone())
                .collect::<Vec<_>>();
            rank_store(&records, args.subtask)?
        }
        QueryEngine::Sqlite => {
            let mut sqlite = match &args.db_path {
                Some(path) => SqliteStore::open(path)?,
                None => SqliteStore::open_in_memory()?,
            };
            let imported = sqlite.import_new_sources(&stored)?;
            info!(
                rows = imported,
                total_rows = sqlite.record_count()?,
                "imported result files into sqlite"
            );
            sqlite.best_entries(args.subtask)?
        }
    };

    let overall = args.overall.then(|| overall_standings(&entries));

    if args.json {
        write_json_response(LeaderboardResponse {
            engine: engine_name(args.engine),
            subtask_filter: args.subtask,
            record_count: stored.len(),
            returned: entries.len(),
            entries,
            overall,
        })
    } else {
        write_text_response(stored.len(), &entries, overall.as_deref())
    }
}

fn engine_name(engine: QueryEngine) -> &'static str {
    match engine {
        QueryEngine::Memory => "memory",
        QueryEngine::Sqlite => "sqlite",
    }
}

fn write_json_response(response: LeaderboardResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize leaderboard json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(
    record_count: usize,
    entries: &[RankedEntry],
    overall: Option<&[OverallStanding]>,
) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Records: {record_count} Ranked: {}", entries.len())?;

    let mut current = None;
    for entry in entries {
        if current != Some(entry.subtask) {
            current = Some(entry.subtask);
            writeln!(
                output,
                "\n{} (by {})",
                entry.subtask,
                entry.subtask.primary_metric_name()
            )?;
        }

        let secondary = entry
            .record
            .metrics
            .entries()
            .into_iter()
            .filter(|(name, _)| *name != entry.subtask.primary_metric_name())
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect::<Vec<_>>()
            .join(" ");

        writeln!(
            output,
            "{}.\t{}\t{:.4}\t{}\t{}",
            entry.rank, entry.participant_id, entry.primary_metric, entry.record.timestamp, secondary
        )?;
    }

    if let Some(overall) = overall {
        writeln!(output, "\nOverall (mean primary metric)")?;
        for standing in overall {
            writeln!(
                output,
                "{}.\t{}\t{:.4}\tsubtasks={}\tlatest={}",
                standing.rank,
                standing.participant_id,
                standing.mean_primary_metric,
                standing.subtask_count,
                standing.latest_timestamp
            )?;
        }
    }

    output.flush()?;
    Ok(())
}
