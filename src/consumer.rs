//! The consumer poll loop: claim, fan out three HTTP calls, persist, repeat.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};

use crate::http::DelayClient;
use crate::messages::{ControlSignal, WorkerMessage};
use crate::queue::{Queue, QueueError};

/// How long a consumer sleeps after an empty poll or a busy-timeout before
/// retrying. Coupled with `EMPTY_POLLS_BEFORE_DRAIN`: changing one changes
/// the drain guard's safety margin proportionally.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive empty polls required, after producer-done, before a consumer
/// is confident the queue is actually drained rather than observing a
/// producer commit still propagating through WAL.
const EMPTY_POLLS_BEFORE_DRAIN: u32 = 3;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub worker_id: usize,
    pub queue_path: PathBuf,
    pub httpbin_url: String,
    pub mock_cpu_load: bool,
}

/// Run one consumer to completion.
pub async fn run(
    config: ConsumerConfig,
    mut control_rx: broadcast::Receiver<ControlSignal>,
    tx: mpsc::Sender<WorkerMessage>,
) {
    let mut queue = match tokio::task::spawn_blocking({
        let path = config.queue_path.clone();
        move || Queue::open(&path)
    })
    .await
    {
        Ok(Ok(queue)) => queue,
        Ok(Err(e)) => {
            let _ = tx
                .send(WorkerMessage::ConsumerFatal {
                    worker_id: config.worker_id,
                    error: format!("failed to open queue: {e}"),
                })
                .await;
            return;
        }
        Err(e) => {
            let _ = tx
                .send(WorkerMessage::ConsumerFatal {
                    worker_id: config.worker_id,
                    error: format!("consumer task panicked: {e}"),
                })
                .await;
            return;
        }
    };

    let http = DelayClient::new(&config.httpbin_url);

    let mut producer_done = false;
    let mut draining = false;
    let mut empty_polls: u32 = 0;

    loop {
        // Drain any pending control signals before deciding what to do
        // next. This is the only point in the loop where `draining` is
        // consulted — never between a claim and its terminating mark_*.
        loop {
            match control_rx.try_recv() {
                Ok(ControlSignal::ProducerDone) => producer_done = true,
                Ok(ControlSignal::Drain) => draining = true,
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }

        if draining {
            let _ = tx
                .send(WorkerMessage::ConsumerDone {
                    worker_id: config.worker_id,
                })
                .await;
            return;
        }

        let claim_result = tokio::task::spawn_blocking(move || {
            let mut queue = queue;
            let result = queue.claim_one();
            (queue, result)
        })
        .await;

        let (returned_queue, result) = match claim_result {
            Ok((q, r)) => (q, r),
            Err(e) => {
                let _ = tx
                    .send(WorkerMessage::ConsumerFatal {
                        worker_id: config.worker_id,
                        error: format!("consumer task panicked: {e}"),
                    })
                    .await;
                return;
            }
        };
        queue = returned_queue;

        let item = match result {
            Ok(Some(item)) => {
                empty_polls = 0;
                item
            }
            Ok(None) => {
                empty_polls += 1;
                if producer_done && empty_polls >= EMPTY_POLLS_BEFORE_DRAIN {
                    let _ = tx
                        .send(WorkerMessage::ConsumerDone {
                            worker_id: config.worker_id,
                        })
                        .await;
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(QueueError::Busy) => {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(e) => {
                let _ = tx
                    .send(WorkerMessage::ConsumerFatal {
                        worker_id: config.worker_id,
                        error: format!("store error: {e}"),
                    })
                    .await;
                return;
            }
        };

        let delays = three_random_delays();
        let (r1, r2, r3) = tokio::join!(
            http.delay(delays[0]),
            http.delay(delays[1]),
            http.delay(delays[2]),
        );

        let mock_cpu_load = config.mock_cpu_load;
        let outcome = match (r1, r2, r3) {
            (Ok(a), Ok(b), Ok(c)) => {
                let results = [a, b, c];
                let id = item.id;
                tokio::task::spawn_blocking(move || {
                    let mut queue = queue;
                    let result = queue.mark_done(id, results);
                    if result.is_ok() && mock_cpu_load {
                        crate::cpu_load::burn();
                    }
                    (queue, result)
                })
                .await
            }
            (a, b, c) => {
                for failed in [a.err(), b.err(), c.err()] {
                    if let Some(e) = failed {
                        tracing::warn!(source_id = item.source_id, "delay call failed: {e}");
                    }
                }
                let id = item.id;
                tokio::task::spawn_blocking(move || {
                    let mut queue = queue;
                    let result = queue.mark_failed(id);
                    (queue, result)
                })
                .await
            }
        };

        match outcome {
            Ok((q, Ok(()))) => queue = q,
            Ok((q, Err(e))) => {
                queue = q;
                tracing::error!(id = item.id, "invariant violation finalizing item: {e}");
                let _ = tx
                    .send(WorkerMessage::ConsumerFatal {
                        worker_id: config.worker_id,
                        error: format!("invariant violation: {e}"),
                    })
                    .await;
                return;
            }
            Err(e) => {
                let _ = tx
                    .send(WorkerMessage::ConsumerFatal {
                        worker_id: config.worker_id,
                        error: format!("consumer task panicked: {e}"),
                    })
                    .await;
                return;
            }
        }

        let _ = tx
            .send(WorkerMessage::ItemProcessed {
                source_id: item.source_id,
            })
            .await;

        // No sleep: there is likely more work.
    }
}

fn three_random_delays() -> [f64; 3] {
    let mut rng = rand::rng();
    [
        rng.random_range(0.10..0.25),
        rng.random_range(0.10..0.25),
        rng.random_range(0.10..0.25),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_delays_are_in_range() {
        for _ in 0..1000 {
            for d in three_random_delays() {
                assert!((0.10..0.25).contains(&d), "delay {d} out of range");
            }
        }
    }
}
