//! Black-box tests for the queue state machine, against a real temp-file
//! SQLite database — mirrors the teacher's convention of keeping an
//! integration suite under `tests/` alongside the per-module unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use rowpump::queue::{HttpResult, Queue, Status};
use rowpump::store;
use rowpump::upstream::UpstreamRow;
use serde_json::json;
use tempfile::tempdir;

fn rows(n: i64) -> Vec<UpstreamRow> {
    (0..n)
        .map(|i| UpstreamRow {
            id: i,
            payload: json!({ "seq": i }),
        })
        .collect()
}

fn fake_results() -> [HttpResult; 3] {
    [
        HttpResult { body: "one".into(), status: 200, duration_ms: 101.0 },
        HttpResult { body: "two".into(), status: 200, duration_ms: 102.0 },
        HttpResult { body: "three".into(), status: 200, duration_ms: 103.0 },
    ]
}

/// E2: one row, one consumer.
#[test]
fn one_row_one_consumer_ends_done() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(1)).unwrap();

    let claimed = q.claim_one().unwrap().expect("row should be claimable");
    assert_eq!(claimed.status, Status::Processing);

    q.mark_done(claimed.id, fake_results()).unwrap();

    let counts = q.status_counts().unwrap();
    assert_eq!(counts.get(&Status::Done), Some(&1));
    assert_eq!(counts.get(&Status::Pending), None);
}

/// E3: 10 rows, 3 concurrent consumers — every id claimed exactly once and
/// the final counts conserve the total enqueued.
#[test]
fn ten_rows_three_consumers_no_double_claim() {
    let dir = tempdir().unwrap();
    let path = Arc::new(dir.path().join("queue.sqlite3"));
    store::init_schema(&path).unwrap();

    let mut producer = Queue::open(&path).unwrap();
    producer.enqueue_batch(&rows(10)).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let mut q = Queue::open(&path).unwrap();
                let mut claimed_ids = Vec::new();
                loop {
                    match q.claim_one() {
                        Ok(Some(item)) => {
                            q.mark_done(item.id, fake_results()).unwrap();
                            claimed_ids.push(item.id);
                        }
                        Ok(None) => break,
                        Err(rowpump::queue::QueueError::Busy) => {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                        }
                        Err(e) => panic!("unexpected queue error: {e}"),
                    }
                }
                claimed_ids
            })
        })
        .collect();

    let mut all_claimed = Vec::new();
    for h in handles {
        all_claimed.extend(h.join().unwrap());
    }

    let unique: HashSet<_> = all_claimed.iter().copied().collect();
    assert_eq!(unique.len(), all_claimed.len(), "a row was claimed twice");
    assert_eq!(unique.len(), 10);

    let counts = producer.status_counts().unwrap();
    let total: i64 = counts.values().sum();
    assert_eq!(total, 10);
    assert_eq!(counts.get(&Status::Done), Some(&10));
}

/// E5: every HTTP call fails for every row -> all rows end up `failed`, none
/// `done`.
#[test]
fn all_calls_failing_marks_every_row_failed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(5)).unwrap();

    while let Some(item) = q.claim_one().unwrap() {
        q.mark_failed(item.id).unwrap();
    }

    let counts = q.status_counts().unwrap();
    assert_eq!(counts.get(&Status::Failed), Some(&5));
    assert_eq!(counts.get(&Status::Done), None);
}

/// Invariant 3: done-completeness — a `done` row always has all nine result
/// fields populated; a `failed` row is never required to.
#[test]
fn done_completeness() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(2)).unwrap();

    let a = q.claim_one().unwrap().unwrap();
    q.mark_done(a.id, fake_results()).unwrap();
    let b = q.claim_one().unwrap().unwrap();
    q.mark_failed(b.id).unwrap();

    // Re-claim is impossible (both are terminal), so inspect via a fresh
    // readonly handle reading the raw rows back out.
    let conn = store::open(&path, true).unwrap();
    let mut stmt = conn
        .prepare("SELECT status, result_1_body, result_2_status, result_3_duration_ms FROM work_queue ORDER BY id")
        .unwrap();
    let mut rows = stmt
        .query_map([], |row| {
            let status: String = row.get(0)?;
            let r1: Option<String> = row.get(1)?;
            let r2: Option<i64> = row.get(2)?;
            let r3: Option<f64> = row.get(3)?;
            Ok((status, r1, r2, r3))
        })
        .unwrap();

    let (status_a, r1, r2, r3) = rows.next().unwrap().unwrap();
    assert_eq!(status_a, "done");
    assert!(r1.is_some() && r2.is_some() && r3.is_some());

    let (status_b, r1, r2, r3) = rows.next().unwrap().unwrap();
    assert_eq!(status_b, "failed");
    assert!(r1.is_none() && r2.is_none() && r3.is_none());
}

/// Boundary: `limit = 1` equivalent at the queue layer — one insert, one
/// claim, queue empty after.
#[test]
fn single_row_boundary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(1)).unwrap();

    assert!(q.claim_one().unwrap().is_some());
    assert!(q.claim_one().unwrap().is_none());
}

/// Boundary: an empty upstream yields nothing to enqueue and nothing to
/// claim.
#[test]
fn empty_source_yields_empty_queue() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(0)).unwrap();

    assert!(q.claim_one().unwrap().is_none());
    assert_eq!(q.status_counts().unwrap().values().sum::<i64>(), 0);
}

/// Invariant 6 (drain safety): simulating a deadline firing mid-processing,
/// `reset_orphans` leaves no row in `processing`.
#[test]
fn reset_orphans_leaves_nothing_processing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");
    store::init_schema(&path).unwrap();

    let mut q = Queue::open(&path).unwrap();
    q.enqueue_batch(&rows(4)).unwrap();

    // Claim two rows and leave them in-flight, as if the deadline fired
    // mid-fan-out.
    q.claim_one().unwrap();
    q.claim_one().unwrap();

    let reset = q.reset_orphans().unwrap();
    assert_eq!(reset, 2);

    let counts = q.status_counts().unwrap();
    assert!(counts.get(&Status::Processing).is_none());
    assert_eq!(counts.get(&Status::Pending), Some(&4));
}
