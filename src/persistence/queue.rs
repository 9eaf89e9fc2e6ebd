//! Single-producer/single-consumer persistence queue and its worker.
//!
//! The pipeline context is the sole producer, the spawned worker the sole
//! consumer. The queue is unbounded but monitored: crossing the high-water
//! mark logs a warning rather than applying backpressure, because the
//! processing path must never block on storage latency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::task::PersistenceTask;
use crate::matching::StoredEmbedding;
use crate::IdError;

/// Durable storage contract.
///
/// The engine owns the retention cap and the binary encoding; the store only
/// loads rows at startup and applies queued mutations.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Load every stored embedding row for startup hydration.
    async fn load_all(&self) -> Result<Vec<StoredEmbedding>, IdError>;

    /// Apply one mutation.
    async fn apply(&self, task: &PersistenceTask) -> Result<(), IdError>;

    /// Apply a batch of consecutive embedding inserts.
    ///
    /// The default applies them one by one; stores with transactional batch
    /// writes can override.
    async fn apply_batch(&self, tasks: &[PersistenceTask]) -> Result<(), IdError> {
        for task in tasks {
            self.apply(task).await?;
        }
        Ok(())
    }
}

/// Configuration for the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Total write attempts per task before it is dropped (default: 3).
    pub max_attempts: u32,
    /// Base backoff between attempts; doubles per retry (default: 100 ms).
    pub retry_backoff: Duration,
    /// Queue depth that triggers a backlog warning (default: 1000).
    pub high_water: usize,
    /// Maximum consecutive inserts folded into one batch (default: 32).
    pub max_batch: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            high_water: 1000,
            max_batch: 32,
        }
    }
}

/// Producer half held by the pipeline.
///
/// Dropping the queue closes the channel; the worker then drains whatever is
/// left and exits.
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistenceTask>,
    depth: Arc<AtomicUsize>,
    high_water: usize,
}

impl PersistenceQueue {
    /// Spawn the consumer worker on the current tokio runtime and return the
    /// producer handle plus the worker's join handle.
    pub fn spawn(
        store: Arc<dyn DurableStore>,
        config: PersistenceConfig,
    ) -> (PersistenceQueue, PersistenceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        let worker = PersistenceWorker {
            rx,
            store,
            depth: Arc::clone(&depth),
            config: config.clone(),
        };
        let join = tokio::spawn(worker.run());

        (
            PersistenceQueue {
                tx,
                depth,
                high_water: config.high_water,
            },
            PersistenceHandle { join },
        )
    }

    /// Enqueue one task. Never blocks.
    pub fn enqueue(&self, task: PersistenceTask) {
        let kind = task.kind();
        if self.tx.send(task).is_err() {
            tracing::warn!(kind, "persistence worker gone; task dropped");
            return;
        }
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if depth == self.high_water {
            tracing::warn!(depth, "persistence queue backlog reached high-water mark");
        }
    }

    /// Enqueue a sequence of tasks, preserving their order.
    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = PersistenceTask>) {
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Current queue depth (tasks enqueued but not yet picked up).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Join handle for the worker, used for the shutdown drain.
pub struct PersistenceHandle {
    join: tokio::task::JoinHandle<()>,
}

impl PersistenceHandle {
    /// Wait for the worker to drain and exit, aborting it if the drain
    /// exceeds `timeout`.
    ///
    /// Callers must drop every [`PersistenceQueue`] clone first, otherwise
    /// the channel never closes and the drain cannot finish.
    pub async fn shutdown(self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(())) => tracing::info!("persistence worker drained"),
            Ok(Err(e)) => tracing::error!(error = %e, "persistence worker panicked"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "persistence drain timed out; forcing termination"
                );
            }
        }
    }
}

struct PersistenceWorker {
    rx: mpsc::UnboundedReceiver<PersistenceTask>,
    store: Arc<dyn DurableStore>,
    depth: Arc<AtomicUsize>,
    config: PersistenceConfig,
}

impl PersistenceWorker {
    async fn run(mut self) {
        tracing::debug!("persistence worker started");

        // `recv` returns None only once the channel is both closed and
        // empty, so the shutdown drain falls out of the loop structure.
        let mut carry: Option<PersistenceTask> = None;
        loop {
            let task = match carry.take() {
                Some(t) => t,
                None => match self.rx.recv().await {
                    Some(t) => {
                        self.depth.fetch_sub(1, Ordering::Relaxed);
                        t
                    }
                    None => break,
                },
            };

            if task.is_insert_embedding() {
                let mut batch = vec![task];
                while batch.len() < self.config.max_batch {
                    match self.rx.try_recv() {
                        Ok(next) => {
                            self.depth.fetch_sub(1, Ordering::Relaxed);
                            if next.is_insert_embedding() {
                                batch.push(next);
                            } else {
                                carry = Some(next);
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                self.apply_batch_with_retry(batch).await;
            } else {
                self.apply_with_retry(task).await;
            }
        }

        tracing::debug!("persistence worker stopped");
    }

    async fn apply_with_retry(&self, task: PersistenceTask) {
        let kind = task.kind();
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=self.config.max_attempts {
            match self.store.apply(&task).await {
                Ok(()) => return,
                Err(e) if attempt < self.config.max_attempts => {
                    tracing::debug!(kind, attempt, error = %e, "durable write failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    tracing::warn!(
                        kind,
                        attempts = self.config.max_attempts,
                        error = %e,
                        "durable write failed; task dropped"
                    );
                }
            }
        }
    }

    async fn apply_batch_with_retry(&self, batch: Vec<PersistenceTask>) {
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=self.config.max_attempts {
            match self.store.apply_batch(&batch).await {
                Ok(()) => return,
                Err(e) if attempt < self.config.max_attempts => {
                    tracing::debug!(
                        batch = batch.len(),
                        attempt,
                        error = %e,
                        "batched durable write failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    tracing::warn!(
                        batch = batch.len(),
                        attempts = self.config.max_attempts,
                        error = %e,
                        "batched durable write failed; batch dropped"
                    );
                }
            }
        }
    }
}
