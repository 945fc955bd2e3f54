//! Typed layer over the work queue store.
//!
//! Encodes the state machine described in the data model: every mutating
//! statement runs inside a `BEGIN IMMEDIATE` transaction so the write lock is
//! acquired upfront, never upgraded from a read lock. This is what keeps the
//! producer's batch insert and a consumer's claim from deadlocking each
//! other.

mod item;

pub use item::{HttpResult, Status, WorkItem};

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::store;
use crate::upstream::UpstreamRow;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("write lock busy")]
    Busy,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("row {0} was not in the processing state")]
    NotProcessing(i64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

fn classify(err: rusqlite::Error) -> QueueError {
    if let rusqlite::Error::SqliteFailure(ref e, _) = err {
        if e.code == rusqlite::ErrorCode::DatabaseBusy {
            return QueueError::Busy;
        }
    }
    QueueError::Database(err)
}

/// A single-threaded-use handle onto the work queue.
///
/// Each worker owns one `Queue`; it must not be shared between workers.
pub struct Queue {
    conn: Connection,
}

impl Queue {
    /// Open a read-write handle at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: store::open(path, false)?,
        })
    }

    /// Open a read-only handle at `path`, suitable for the progress sampler.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: store::open(path, true)?,
        })
    }

    /// Insert a batch of upstream rows as pending work items, in one
    /// all-or-nothing write transaction.
    pub fn enqueue_batch(&mut self, rows: &[UpstreamRow]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(classify)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO work_queue (source_id, payload, status, created_at)
                     VALUES (?1, ?2, 'pending', ?3)",
                )
                .map_err(classify)?;
            for row in rows {
                stmt.execute(params![row.id, row.payload.to_string(), now])
                    .map_err(classify)?;
            }
        }
        tx.commit().map_err(classify)?;
        Ok(rows.len())
    }

    /// Atomically claim one pending row, transitioning it to `processing`.
    pub fn claim_one(&mut self) -> Result<Option<WorkItem>> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate).map_err(classify)?;

        let claimed_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM work_queue WHERE status = 'pending' ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;

        let Some(id) = claimed_id else {
            tx.commit().map_err(classify)?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE work_queue SET status = 'processing', processed_at = ?1 WHERE id = ?2",
            params![now, id],
        )
        .map_err(classify)?;

        let item = tx
            .query_row(
                "SELECT * FROM work_queue WHERE id = ?1",
                params![id],
                item::row_to_work_item,
            )
            .map_err(classify)?;

        tx.commit().map_err(classify)?;
        Ok(Some(item))
    }

    /// Transition a claimed row to `done`, writing all nine result fields.
    ///
    /// Fails with [`QueueError::NotProcessing`] if the row is not currently
    /// `processing` — this is an invariant violation, not a runtime
    /// condition a caller should retry.
    pub fn mark_done(&mut self, id: i64, results: [HttpResult; 3]) -> Result<()> {
        let tx = self.conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate).map_err(classify)?;
        let changed = tx
            .execute(
                r#"
                UPDATE work_queue SET
                    status = 'done',
                    result_1_body = ?1, result_1_status = ?2, result_1_duration_ms = ?3,
                    result_2_body = ?4, result_2_status = ?5, result_2_duration_ms = ?6,
                    result_3_body = ?7, result_3_status = ?8, result_3_duration_ms = ?9
                WHERE id = ?10 AND status = 'processing'
                "#,
                params![
                    results[0].body,
                    results[0].status,
                    results[0].duration_ms,
                    results[1].body,
                    results[1].status,
                    results[1].duration_ms,
                    results[2].body,
                    results[2].status,
                    results[2].duration_ms,
                    id,
                ],
            )
            .map_err(classify)?;

        if changed == 0 {
            tx.rollback().map_err(classify)?;
            return Err(QueueError::NotProcessing(id));
        }
        tx.commit().map_err(classify)?;
        Ok(())
    }

    /// Transition a claimed row to `failed`. Result columns remain null.
    pub fn mark_failed(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate).map_err(classify)?;
        let changed = tx
            .execute(
                "UPDATE work_queue SET status = 'failed' WHERE id = ?1 AND status = 'processing'",
                params![id],
            )
            .map_err(classify)?;

        if changed == 0 {
            tx.rollback().map_err(classify)?;
            return Err(QueueError::NotProcessing(id));
        }
        tx.commit().map_err(classify)?;
        Ok(())
    }

    /// Reset every `processing` row back to `pending`, clearing
    /// `processed_at`. Used only by the orchestrator during shutdown.
    /// Returns the number of rows reset.
    pub fn reset_orphans(&mut self) -> Result<usize> {
        let tx = self.conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate).map_err(classify)?;
        let changed = tx
            .execute(
                "UPDATE work_queue SET status = 'pending', processed_at = NULL WHERE status = 'processing'",
                [],
            )
            .map_err(classify)?;
        tx.commit().map_err(classify)?;
        Ok(changed)
    }

    /// Read-only aggregate of row counts per status.
    pub fn status_counts(&self) -> Result<HashMap<Status, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM work_queue GROUP BY status")
            .map_err(classify)?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(classify)?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row.map_err(classify)?;
            if let Some(status) = Status::from_str(&status) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamRow;
    use serde_json::json;
    use tempfile::tempdir;

    fn rows(n: i64) -> Vec<UpstreamRow> {
        (0..n)
            .map(|i| UpstreamRow {
                id: i,
                payload: json!({ "n": i }),
            })
            .collect()
    }

    fn fake_results() -> [HttpResult; 3] {
        [
            HttpResult { body: "a".into(), status: 200, duration_ms: 100.0 },
            HttpResult { body: "b".into(), status: 200, duration_ms: 110.0 },
            HttpResult { body: "c".into(), status: 200, duration_ms: 120.0 },
        ]
    }

    #[test]
    fn enqueue_then_claim_transitions_to_processing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(3)).unwrap();

        let claimed = q.claim_one().unwrap().expect("a row should be claimable");
        assert_eq!(claimed.status, Status::Processing);
        assert!(claimed.processed_at.is_some());
        assert!(claimed.results.iter().all(|r| r.is_none()));
    }

    #[test]
    fn claim_one_never_returns_same_row_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(5)).unwrap();

        let mut seen = std::collections::HashSet::new();
        while let Some(item) = q.claim_one().unwrap() {
            assert!(seen.insert(item.id), "row {} claimed twice", item.id);
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn mark_done_requires_processing_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(1)).unwrap();

        // Row is still pending, not processing.
        let err = q.mark_done(1, fake_results()).unwrap_err();
        assert!(matches!(err, QueueError::NotProcessing(1)));
    }

    #[test]
    fn mark_done_is_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(1)).unwrap();
        let claimed = q.claim_one().unwrap().unwrap();
        q.mark_done(claimed.id, fake_results()).unwrap();

        let counts = q.status_counts().unwrap();
        assert_eq!(counts.get(&Status::Done), Some(&1));
    }

    #[test]
    fn mark_failed_preserves_no_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(1)).unwrap();
        let claimed = q.claim_one().unwrap().unwrap();
        q.mark_failed(claimed.id).unwrap();

        let counts = q.status_counts().unwrap();
        assert_eq!(counts.get(&Status::Failed), Some(&1));
    }

    #[test]
    fn reset_orphans_is_idempotent_and_clears_processed_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(2)).unwrap();
        q.claim_one().unwrap();
        q.claim_one().unwrap();

        let reset = q.reset_orphans().unwrap();
        assert_eq!(reset, 2);

        let counts = q.status_counts().unwrap();
        assert_eq!(counts.get(&Status::Pending), Some(&2));
        assert!(counts.get(&Status::Processing).is_none());

        let reset_again = q.reset_orphans().unwrap();
        assert_eq!(reset_again, 0);
    }

    #[test]
    fn row_conservation_across_statuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.sqlite3");
        store::init_schema(&path).unwrap();

        let mut q = Queue::open(&path).unwrap();
        q.enqueue_batch(&rows(4)).unwrap();

        let a = q.claim_one().unwrap().unwrap();
        q.mark_done(a.id, fake_results()).unwrap();
        let b = q.claim_one().unwrap().unwrap();
        q.mark_failed(b.id).unwrap();
        q.claim_one().unwrap();

        let counts = q.status_counts().unwrap();
        let total: i64 = counts.values().sum();
        assert_eq!(total, 4);
    }
}
