use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::Subtask;
use crate::store::DirectoryStore;

pub fn run(args: StatusArgs) -> Result<()> {
    let store = DirectoryStore::new(&args.results_dir);

    info!(results_dir = %store.root().display(), "status requested");

    let files = store.result_files()?;
    if files.is_empty() {
        warn!(path = %store.root().display(), "result store holds no result files");
        return Ok(());
    }

    let stored = store.load_entries()?;
    let summary = summarize(
        stored
            .iter()
            .map(|entry| (entry.record.subtask, entry.record.participant_id.as_str())),
    );

    info!(
        files = files.len(),
        records = stored.len(),
        participants = summary.participants.len(),
        "result store status"
    );
    for subtask in Subtask::ALL {
        info!(
            subtask = %subtask,
            records = summary.per_subtask.get(&subtask).copied().unwrap_or(0),
            "subtask records"
        );
    }
    for (participant_id, count) in &summary.participants {
        info!(participant_id = %participant_id, records = count, "participant records");
    }

    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct StoreSummary {
    per_subtask: BTreeMap<Subtask, usize>,
    participants: BTreeMap<String, usize>,
}

fn summarize<'a>(records: impl Iterator<Item = (Subtask, &'a str)>) -> StoreSummary {
    let mut summary = StoreSummary::default();
    for (subtask, participant_id) in records {
        *summary.per_subtask.entry(subtask).or_default() += 1;
        *summary
            .participants
            .entry(participant_id.to_string())
            .or_default() += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_records_per_subtask_and_participant() {
        let summary = summarize(
            [
                (Subtask::Subtask1, "agent-a"),
                (Subtask::Subtask1, "agent-b"),
                (Subtask::Subtask2, "agent-a"),
            ]
            .into_iter(),
        );

        assert_eq!(summary.per_subtask[&Subtask::Subtask1], 2);
        assert_eq!(summary.per_subtask[&Subtask::Subtask2], 1);
        assert_eq!(summary.participants["agent-a"], 2);
        assert_eq!(summary.participants.len(), 2);
    }
}
