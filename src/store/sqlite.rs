use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::{info, warn};

use super::{ResultStore, StoredRecord, records_from_document};
use crate::model::{AdaptedSubmission, CanonicalResult, RankedEntry, Subtask};
use crate::ranking::record_key;

const SCHEMA_VERSION: &str = "1";

/// Analytical store: one row per canonical record, columns named after the
/// canonical schema. Rows are only ever inserted.
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection =
            Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn record_count(&self) -> Result<i64> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn insert_records(&mut self, source: &str, records: &[CanonicalResult]) -> Result<usize> {
        let tx = self
            .connection
            .transaction()
            .context("failed to start result insert transaction")?;

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO results (
                  source, subtask, participant_id, timestamp,
                  score, success_rate, accuracy, hallucination_rate,
                  config, record_json
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ",
            )?;

            for record in records {
                let config = serde_json::to_string(&record.config)
                    .context("failed to serialize record config")?;
                statement.execute(params![
                    source,
                    record.subtask.as_str(),
                    record.participant_id,
                    record.timestamp,
                    record.metrics.score,
                    record.metrics.success_rate,
                    record.metrics.accuracy,
                    record.metrics.hallucination_rate,
                    config,
                    record_key(record),
                ])?;
            }
        }

        tx.commit().context("failed to commit result inserts")?;
        Ok(records.len())
    }

    pub fn has_source(&self, source: &str) -> Result<bool> {
        let found = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM results WHERE source = ?1)",
                params![source],
                |row| row.get::<_, bool>(0),
            )
            .with_context(|| format!("failed to look up source {source}"))?;
        Ok(found)
    }

    /// Inserts records whose source has not been imported before. Sources are
    /// immutable result files, so a source seen once is complete.
    pub fn import_new_sources(&mut self, stored: &[StoredRecord]) -> Result<usize> {
        let mut by_source = BTreeMap::<&str, Vec<CanonicalResult>>::new();
        for entry in stored {
            by_source
                .entry(entry.source.as_str())
                .or_default()
                .push(entry.record.clone());
        }

        let mut inserted = 0;
        for (source, records) in by_source {
            if self.has_source(source)? {
                continue;
            }
            inserted += self.insert_records(source, &records)?;
        }
        Ok(inserted)
    }

    /// Best entry per (participant, subtask), computed entirely in SQL with
    /// the same ordering as [`crate::ranking::select_best`].
    pub fn best_entries(&self, subtask: Option<Subtask>) -> Result<Vec<RankedEntry>> {
        let mut statement = self.connection.prepare(
            "
            WITH scored AS (
              SELECT
                subtask,
                participant_id,
                timestamp,
                record_json,
                CASE subtask WHEN 'subtask1' THEN score ELSE accuracy END AS primary_metric
              FROM results
              WHERE ?1 IS NULL OR subtask = ?1
            ),
            partitioned AS (
              SELECT
                *,
                ROW_NUMBER() OVER (
                  PARTITION BY participant_id, subtask
                  ORDER BY primary_metric DESC, timestamp DESC, record_json ASC
                ) AS partition_rank
              FROM scored
              WHERE primary_metric IS NOT NULL
            )
            SELECT
              subtask,
              participant_id,
              primary_metric,
              record_json,
              ROW_NUMBER() OVER (
                PARTITION BY subtask
                ORDER BY primary_metric DESC, timestamp DESC, participant_id ASC
              ) AS board_rank
            FROM partitioned
            WHERE partition_rank = 1
            ORDER BY subtask ASC, board_rank ASC
            ",
        )?;

        let mut rows = statement.query(params![subtask.map(Subtask::as_str)])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let subtask_raw: String = row.get(0)?;
            let participant_id: String = row.get(1)?;
            let primary_metric: f64 = row.get(2)?;
            let record_json: String = row.get(3)?;
            let board_rank: i64 = row.get(4)?;

            let Some(subtask) = Subtask::parse(&subtask_raw) else {
                warn!(subtask = %subtask_raw, "skipping row with unknown subtask");
                continue;
            };
            let record: CanonicalResult = serde_json::from_str(&record_json)
                .with_context(|| format!("stored record for {participant_id} is not canonical"))?;

            entries.push(RankedEntry {
                rank: usize::try_from(board_rank).context("negative leaderboard rank")?,
                subtask,
                participant_id,
                primary_metric,
                record,
            });
        }

        Ok(entries)
    }
}

impl ResultStore for SqliteStore {
    fn append(&mut self, submission: &AdaptedSubmission) -> Result<String> {
        let inserted = self.insert_records("append", &submission.results)?;
        info!(records = inserted, "appended results to sqlite store");
        Ok(format!("sqlite[{inserted} rows]"))
    }

    fn load_all(&self) -> Result<Vec<CanonicalResult>> {
        let mut statement = self
            .connection
            .prepare("SELECT source, record_json FROM results ORDER BY id ASC")?;
        let mut rows = statement.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let source: String = row.get(0)?;
            let record_json: String = row.get(1)?;
            let document = serde_json::from_str(&record_json)
                .with_context(|| format!("stored record from {source} is not json"))?;
            records.extend(
                records_from_document(&source, &document)
                    .into_iter()
                    .map(|stored| stored.record),
            );
        }

        Ok(records)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS results (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          source TEXT NOT NULL,
          subtask TEXT NOT NULL,
          participant_id TEXT NOT NULL,
          timestamp TEXT NOT NULL,
          score REAL,
          success_rate REAL,
          accuracy REAL,
          hallucination_rate REAL,
          config TEXT NOT NULL,
          record_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_results_partition
          ON results(subtask, participant_id);
        ",
    )?;

    connection
        .execute(
            "INSERT OR REPLACE INTO metadata(key, value) VALUES('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )
        .context("failed to record schema version")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::model::CanonicalMetrics;
    use crate::ranking::select_best;

    fn record(subtask: Subtask, participant: &str, metric: f64, timestamp: &str) -> CanonicalResult {
        let metrics = match subtask {
            Subtask::Subtask1 => CanonicalMetrics {
                score: Some(metric),
                success_rate: Some(metric),
                ..CanonicalMetrics::default()
            },
            Subtask::Subtask2 => CanonicalMetrics {
                accuracy: Some(metric),
                hallucination_rate: Some(1.0 - metric),
                ..CanonicalMetrics::default()
            },
        };
        CanonicalResult {
            subtask,
            participant_id: participant.to_string(),
            timestamp: timestamp.to_string(),
            metrics,
            config: json!({"model": participant}),
        }
    }

    fn fixture() -> Vec<CanonicalResult> {
        vec![
            record(Subtask::Subtask1, "agent-a", 0.85, "2025-06-01T00:00:00.000000Z"),
            record(Subtask::Subtask1, "agent-a", 0.90, "2025-05-01T00:00:00.000000Z"),
            record(Subtask::Subtask1, "agent-b", 0.90, "2025-06-02T00:00:00.000000Z"),
            record(Subtask::Subtask1, "agent-b", 0.90, "2025-06-03T00:00:00.000000Z"),
            record(Subtask::Subtask2, "agent-a", 0.40, "2025-06-01T00:00:00.000000Z"),
            record(Subtask::Subtask2, "agent-c", 0.75, "2025-06-01T00:00:00.000000Z"),
        ]
    }

    #[test]
    fn sql_leaderboard_matches_in_memory_selector() {
        let records = fixture();
        let mut store = SqliteStore::open_in_memory().expect("in-memory DB should open");
        store
            .insert_records("fixture", &records)
            .expect("insert should succeed");

        let from_sql = store.best_entries(None).expect("query should succeed");
        let in_memory = select_best(&records);

        let summarize = |entries: &[RankedEntry]| {
            entries
                .iter()
                .map(|entry| {
                    (
                        entry.subtask,
                        entry.rank,
                        entry.participant_id.clone(),
                        entry.record.timestamp.clone(),
                    )
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(summarize(&from_sql), summarize(&in_memory));
        assert_eq!(from_sql.len(), 4);
        assert_eq!(from_sql[0].participant_id, "agent-b");
        assert_eq!(from_sql[0].record.timestamp, "2025-06-03T00:00:00.000000Z");
    }

    #[test]
    fn sql_leaderboard_filters_by_subtask() {
        let mut store = SqliteStore::open_in_memory().expect("in-memory DB should open");
        store
            .insert_records("fixture", &fixture())
            .expect("insert should succeed");

        let entries = store
            .best_entries(Some(Subtask::Subtask2))
            .expect("query should succeed");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].participant_id, "agent-c");
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].rank, 2);
    }

    #[test]
    fn append_only_accumulates_duplicates() {
        let mut store = SqliteStore::open_in_memory().expect("in-memory DB should open");
        let submission = AdaptedSubmission {
            participants: Map::new(),
            results: fixture(),
        };

        store.append(&submission).expect("first append");
        store.append(&submission).expect("second append");

        assert_eq!(store.record_count().expect("count"), 12);
        assert_eq!(store.load_all().expect("load").len(), 12);
        assert_eq!(store.best_entries(None).expect("query").len(), 4);
    }

    #[test]
    fn import_skips_sources_already_present() {
        let stored = fixture()
            .into_iter()
            .enumerate()
            .map(|(index, record)| StoredRecord {
                source: format!("run-{}.json", index % 2),
                record,
            })
            .collect::<Vec<_>>();

        let mut store = SqliteStore::open_in_memory().expect("in-memory DB should open");
        assert_eq!(store.import_new_sources(&stored).expect("first import"), 6);
        assert_eq!(store.import_new_sources(&stored).expect("second import"), 0);
        assert!(store.has_source("run-1.json").expect("lookup"));
        assert_eq!(store.record_count().expect("count"), 6);
    }

    #[test]
    fn stored_offsets_rank_by_instant_in_both_engines() {
        let document = json!({
            "participants": {},
            "results": [
                {"subtask": "subtask1", "participant_id": "agent-a",
                 "timestamp": "2025-06-01T10:00:00Z", "score": 0.9,
                 "config": {"run": "utc"}},
                {"subtask": "subtask1", "participant_id": "agent-a",
                 "timestamp": "2025-06-01T11:30:00+02:00", "score": 0.9,
                 "config": {"run": "offset"}}
            ]
        });

        let stored = records_from_document("mixed.json", &document);
        assert_eq!(stored[0].record.timestamp, "2025-06-01T10:00:00.000000Z");
        assert_eq!(stored[1].record.timestamp, "2025-06-01T09:30:00.000000Z");

        let mut store = SqliteStore::open_in_memory().expect("in-memory DB should open");
        store.import_new_sources(&stored).expect("import should succeed");
        let from_sql = store.best_entries(None).expect("query should succeed");

        let records = stored
            .iter()
            .map(|entry| entry.record.clone())
            .collect::<Vec<_>>();
        let in_memory = select_best(&records);

        assert_eq!(from_sql[0].record.config["run"], "utc");
        assert_eq!(in_memory[0].record.config["run"], "utc");
        assert_eq!(from_sql[0].record, in_memory[0].record);
    }
}
