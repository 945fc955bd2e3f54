//! The producer: pulls pages from the upstream source and enqueues them.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::messages::WorkerMessage;
use crate::queue::Queue;
use crate::upstream::PgUpstream;

/// Producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub page_size: u32,
    pub row_limit: u64,
    pub queue_path: PathBuf,
}

/// Run the producer to completion: repeatedly fetch a page from `upstream`
/// and enqueue it, until the upstream source is exhausted or `row_limit` is
/// reached. Reports lifecycle messages on `tx`.
pub async fn run(config: ProducerConfig, upstream: PgUpstream, tx: mpsc::Sender<WorkerMessage>) {
    let mut queue = match tokio::task::spawn_blocking({
        let path = config.queue_path.clone();
        move || Queue::open(&path)
    })
    .await
    {
        Ok(Ok(queue)) => queue,
        Ok(Err(e)) => {
            let _ = tx
                .send(WorkerMessage::ProducerFatal {
                    error: format!("failed to open queue: {e}"),
                })
                .await;
            return;
        }
        Err(e) => {
            let _ = tx
                .send(WorkerMessage::ProducerFatal {
                    error: format!("producer task panicked: {e}"),
                })
                .await;
            return;
        }
    };

    let mut offset: i64 = 0;
    let mut total_inserted: u64 = 0;

    loop {
        let page = match upstream.fetch_page(config.page_size as i64, offset).await {
            Ok(page) => page,
            Err(e) => {
                let _ = tx
                    .send(WorkerMessage::ProducerFatal {
                        error: format!("upstream fetch failed: {e}"),
                    })
                    .await;
                return;
            }
        };

        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;

        let mut page = page;
        if config.row_limit > 0 {
            let remaining = config.row_limit.saturating_sub(total_inserted);
            if remaining == 0 {
                break;
            }
            if page.len() as u64 > remaining {
                page.truncate(remaining as usize);
            }
        }

        let inserted = match tokio::task::spawn_blocking(move || {
            let mut queue = queue;
            queue.enqueue_batch(&page).map(|n| (queue, n))
        })
        .await
        {
            Ok(Ok((q, n))) => {
                queue = q;
                n
            }
            Ok(Err(e)) => {
                let _ = tx
                    .send(WorkerMessage::ProducerFatal {
                        error: format!("enqueue failed: {e}"),
                    })
                    .await;
                return;
            }
            Err(e) => {
                let _ = tx
                    .send(WorkerMessage::ProducerFatal {
                        error: format!("producer task panicked: {e}"),
                    })
                    .await;
                return;
            }
        };

        total_inserted += inserted as u64;
        let _ = tx
            .send(WorkerMessage::BatchInserted { count: inserted })
            .await;

        if config.row_limit > 0 && total_inserted >= config.row_limit {
            break;
        }
    }

    let _ = tx
        .send(WorkerMessage::ProducerDone { total_inserted })
        .await;
}
