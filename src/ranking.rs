use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;
use chrono::DateTime;
use tracing::debug;

use crate::model::{CanonicalResult, OverallStanding, RankedEntry, Subtask};
use crate::store::ResultStore;

/// Picks the best record per (participant, subtask).
///
/// Within a group the highest primary metric wins, then the most recent
/// timestamp, then the smallest serialized record, so the choice does not
/// depend on input order. Entries come back grouped by subtask and ranked
/// within it.
pub fn select_best(records: &[CanonicalResult]) -> Vec<RankedEntry> {
    let mut best = BTreeMap::<(Subtask, &str), &CanonicalResult>::new();

    for record in records {
        if record.primary_metric().is_none() {
            debug!(
                participant_id = %record.participant_id,
                subtask = %record.subtask,
                "skipping record without primary metric"
            );
            continue;
        }

        let key = (record.subtask, record.participant_id.as_str());
        let preferred = best
            .get(&key)
            .is_none_or(|current| compare_preference(record, current) == Ordering::Less);
        if preferred {
            best.insert(key, record);
        }
    }

    let mut winners = best.into_values().collect::<Vec<_>>();
    winners.sort_by(|a, b| {
        a.subtask
            .cmp(&b.subtask)
            .then_with(|| compare_metric(a, b))
            .then_with(|| compare_timestamps(&b.timestamp, &a.timestamp))
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });

    let mut entries = Vec::with_capacity(winners.len());
    let mut rank = 0;
    let mut previous_subtask = None;
    for record in winners {
        if previous_subtask != Some(record.subtask) {
            previous_subtask = Some(record.subtask);
            rank = 0;
        }
        rank += 1;

        entries.push(RankedEntry {
            rank,
            subtask: record.subtask,
            participant_id: record.participant_id.clone(),
            primary_metric: record.primary_metric().unwrap_or_default(),
            record: record.clone(),
        });
    }

    entries
}

/// Reads the full store and ranks it. Recomputed on every call.
pub fn rank_store(
    store: &dyn ResultStore,
    subtask: Option<Subtask>,
) -> Result<Vec<RankedEntry>> {
    let records = store.load_all()?;
    let mut entries = select_best(&records);
    if let Some(subtask) = subtask {
        entries.retain(|entry| entry.subtask == subtask);
    }
    Ok(entries)
}

/// `Less` when `a` is preferred over `b`.
fn compare_preference(a: &CanonicalResult, b: &CanonicalResult) -> Ordering {
    compare_metric(a, b)
        .then_with(|| compare_timestamps(&b.timestamp, &a.timestamp))
        .then_with(|| record_key(a).cmp(&record_key(b)))
}

/// Primary metric, descending.
fn compare_metric(a: &CanonicalResult, b: &CanonicalResult) -> Ordering {
    let a_metric = a.primary_metric().unwrap_or(f64::NEG_INFINITY);
    let b_metric = b.primary_metric().unwrap_or(f64::NEG_INFINITY);
    b_metric.total_cmp(&a_metric)
}

fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

pub(crate) fn record_key(record: &CanonicalResult) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Mean primary metric over each participant's ranked entries.
pub fn overall_standings(entries: &[RankedEntry]) -> Vec<OverallStanding> {
    let mut by_participant = BTreeMap::<&str, Vec<&RankedEntry>>::new();
    for entry in entries {
        by_participant
            .entry(entry.participant_id.as_str())
            .or_default()
            .push(entry);
    }

    let mut standings = by_participant
        .into_iter()
        .map(|(participant_id, entries)| {
            let total = entries.iter().map(|entry| entry.primary_metric).sum::<f64>();
            let latest_timestamp = entries
                .iter()
                .map(|entry| entry.record.timestamp.as_str())
                .max_by(|a, b| compare_timestamps(a, b))
                .unwrap_or_default()
                .to_string();

            OverallStanding {
                rank: 0,
                participant_id: participant_id.to_string(),
                mean_primary_metric: total / entries.len() as f64,
                subtask_count: entries.len(),
                latest_timestamp,
            }
        })
        .collect::<Vec<_>>();

    standings.sort_by(|a, b| {
        b.mean_primary_metric
            .total_cmp(&a.mean_primary_metric)
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    for (index, standing) in standings.iter_mut().enumerate() {
        standing.rank = index + 1;
    }

    standings
}
