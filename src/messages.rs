//! Typed messages exchanged between the orchestrator and its workers.
//!
//! The teacher crate wires worker progress through `tokio::sync::mpsc`
//! channels carrying small event enums (see `services::download::DownloadEvent`);
//! the pipeline here follows the same shape, with one channel per worker
//! feeding into the orchestrator's event loop, and a `broadcast` channel
//! carrying the two control signals (`producer_done`, `drain`) back out.

/// Messages a producer or consumer sends to the orchestrator.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// The producer committed one page of rows.
    BatchInserted { count: usize },
    /// The producer has exhausted the upstream source or hit its row limit.
    ProducerDone { total_inserted: u64 },
    /// The producer hit an unrecoverable error and stopped.
    ProducerFatal { error: String },
    /// A consumer finished processing one work item (successfully or not).
    ItemProcessed { source_id: i64 },
    /// A consumer observed the drain/termination conditions and exited.
    ConsumerDone { worker_id: usize },
    /// A consumer hit an unrecoverable error and stopped.
    ConsumerFatal { worker_id: usize, error: String },
}

/// Control signals the orchestrator broadcasts to every consumer.
#[derive(Debug, Clone, Copy)]
pub enum ControlSignal {
    /// The producer has finished; consumers should start counting empty
    /// polls toward the three-poll drain guard.
    ProducerDone,
    /// The deadline fired; consumers should finish their current item (if
    /// any) and exit at the next poll, regardless of `empty_polls`.
    Drain,
}
