//! Top-level pipeline lifecycle: bootstrap, spawn, relay, sample, shut down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::consumer::{self, ConsumerConfig};
use crate::messages::{ControlSignal, WorkerMessage};
use crate::producer::{self, ProducerConfig};
use crate::queue::Queue;
use crate::store;
use crate::summary;
use crate::upstream::PgUpstream;

/// How often the progress sampler emits `status_counts` at info level.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(2000);

/// How long, after broadcasting `drain`, the orchestrator waits for every
/// consumer to report done before forcing shutdown anyway.
const DRAIN_SAFETY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the full pipeline to completion and return the process exit code.
pub async fn run(settings: Settings) -> i32 {
    tracing::info!(
        consumers = settings.consumers,
        batch_size = settings.batch_size,
        limit = settings.limit,
        max_duration = settings.max_duration_secs,
        "starting pipeline"
    );

    if let Err(e) = store::reset(&settings.queue_path) {
        tracing::error!("failed to remove stale queue file: {e}");
        return 1;
    }
    if let Err(e) = store::init_schema(&settings.queue_path) {
        tracing::error!("failed to initialize schema: {e}");
        return 1;
    }

    let upstream = match PgUpstream::connect(&settings.pg).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!("failed to connect to upstream: {e}");
            return 1;
        }
    };

    let (worker_tx, mut worker_rx) = mpsc::channel::<WorkerMessage>(256);
    let (control_tx, _) = broadcast::channel::<ControlSignal>(16);

    let producer_handle: JoinHandle<()> = tokio::spawn(producer::run(
        ProducerConfig {
            page_size: settings.batch_size,
            row_limit: settings.limit,
            queue_path: settings.queue_path.clone(),
        },
        upstream,
        worker_tx.clone(),
    ));

    let mut consumer_handles: Vec<JoinHandle<()>> = Vec::with_capacity(settings.consumers as usize);
    for worker_id in 0..settings.consumers as usize {
        let config = ConsumerConfig {
            worker_id,
            queue_path: settings.queue_path.clone(),
            httpbin_url: settings.httpbin_url.clone(),
            mock_cpu_load: settings.mock_cpu_load,
        };
        let rx = control_tx.subscribe();
        let tx = worker_tx.clone();
        consumer_handles.push(tokio::spawn(consumer::run(config, rx, tx)));
    }
    // The orchestrator's own clone must be dropped so `worker_rx` closes
    // once every worker has finished.
    drop(worker_tx);

    let rows_produced = Arc::new(AtomicU64::new(0));
    let consumers_done = Arc::new(AtomicU64::new(0));
    let shutting_down = Arc::new(AtomicBool::new(false));
    let exit_code = Arc::new(AtomicU64::new(0));

    let sampler_queue_path = settings.queue_path.clone();
    let sampler_shutting_down = shutting_down.clone();
    let sampler_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            interval.tick().await;
            if sampler_shutting_down.load(Ordering::Relaxed) {
                break;
            }
            let path = sampler_queue_path.clone();
            let counts = tokio::task::spawn_blocking(move || {
                Queue::open_readonly(&path).and_then(|q| q.status_counts())
            })
            .await;
            match counts {
                Ok(Ok(counts)) => tracing::info!(?counts, "progress"),
                Ok(Err(e)) => tracing::warn!("progress sampler error: {e}"),
                Err(e) => tracing::warn!("progress sampler task panicked: {e}"),
            }
        }
    });

    // Notified once a `drain` is actually broadcast (deadline fired,
    // producer-fatal, or consumer-fatal) -- this is what arms the 30s
    // safety countdown below. It must NOT start counting from orchestrator
    // start, only from the moment a drain is actually in flight.
    let drain_signaled = Arc::new(Notify::new());

    let deadline_handle: Option<JoinHandle<()>> = if settings.max_duration_secs > 0 {
        let control_tx = control_tx.clone();
        let deadline = settings.max_duration_secs;
        let drain_signaled = drain_signaled.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(deadline)).await;
            tracing::info!("deadline fired, broadcasting drain");
            let _ = control_tx.send(ControlSignal::Drain);
            drain_signaled.notify_one();
        }))
    } else {
        None
    };

    let total_consumers = settings.consumers as u64;
    let mut producer_fatal = false;
    let mut consumer_fatal = false;

    // Drive the event loop until every worker has reported in.
    let drain_deadline = async {
        loop {
            match worker_rx.recv().await {
                Some(WorkerMessage::BatchInserted { count }) => {
                    rows_produced.fetch_add(count as u64, Ordering::Relaxed);
                }
                Some(WorkerMessage::ProducerDone { total_inserted }) => {
                    tracing::info!(total_inserted, "producer done, relaying to consumers");
                    let _ = control_tx.send(ControlSignal::ProducerDone);
                }
                Some(WorkerMessage::ProducerFatal { error }) => {
                    tracing::error!("producer fatal: {error}");
                    producer_fatal = true;
                    let _ = control_tx.send(ControlSignal::Drain);
                    drain_signaled.notify_one();
                }
                Some(WorkerMessage::ItemProcessed { source_id }) => {
                    tracing::debug!(source_id, "item processed");
                }
                Some(WorkerMessage::ConsumerDone { worker_id }) => {
                    tracing::debug!(worker_id, "consumer done");
                    let done = consumers_done.fetch_add(1, Ordering::Relaxed) + 1;
                    if done >= total_consumers {
                        break;
                    }
                }
                Some(WorkerMessage::ConsumerFatal { worker_id, error }) => {
                    tracing::error!(worker_id, "consumer fatal: {error}");
                    consumer_fatal = true;
                    // A non-zero consumer exit must trigger shutdown, same as
                    // a producer-fatal: drain the rest rather than let them
                    // run out the clock on their own empty-poll countdown.
                    let _ = control_tx.send(ControlSignal::Drain);
                    drain_signaled.notify_one();
                    let done = consumers_done.fetch_add(1, Ordering::Relaxed) + 1;
                    if done >= total_consumers {
                        break;
                    }
                }
                None => break,
            }
        }
    };

    run_until_drained(drain_deadline, &drain_signaled, DRAIN_SAFETY_TIMEOUT).await;

    shutting_down.store(true, Ordering::Relaxed);
    sampler_handle.abort();
    if let Some(h) = deadline_handle {
        h.abort();
    }
    producer_handle.abort();
    for h in &consumer_handles {
        h.abort();
    }

    let reset_count = tokio::task::spawn_blocking({
        let path = settings.queue_path.clone();
        move || Queue::open(&path).and_then(|mut q| q.reset_orphans())
    })
    .await;

    let orphans_reset = match reset_count {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            tracing::error!("failed to reset orphans during shutdown: {e}");
            0
        }
        Err(e) => {
            tracing::error!("shutdown task panicked: {e}");
            0
        }
    };

    let final_counts = tokio::task::spawn_blocking({
        let path = settings.queue_path.clone();
        move || Queue::open_readonly(&path).and_then(|q| q.status_counts())
    })
    .await
    .ok()
    .and_then(|r| r.ok())
    .unwrap_or_default();

    let code = if producer_fatal || consumer_fatal {
        1
    } else {
        0
    };
    exit_code.store(code as u64, Ordering::Relaxed);

    summary::print(&summary::Summary {
        rows_produced: rows_produced.load(Ordering::Relaxed),
        final_counts,
        orphans_reset,
        exit_code: code,
    });

    code
}

/// Race `event_loop` against a drain safety net: once `drain_signaled` fires,
/// `event_loop` has `safety_timeout` to finish on its own before this
/// function returns regardless. Pulled out of [`run`] as its own function so
/// the "countdown starts at the signal, not at process start" behavior can
/// be exercised directly, without standing up the whole pipeline.
async fn run_until_drained<F>(event_loop: F, drain_signaled: &Notify, safety_timeout: Duration)
where
    F: std::future::Future<Output = ()>,
{
    let drain_safety = async {
        drain_signaled.notified().await;
        tokio::time::sleep(safety_timeout).await;
    };

    tokio::select! {
        _ = event_loop => {}
        _ = drain_safety => {
            tracing::warn!("drain safety timeout elapsed, forcing shutdown");
        }
    }
}
