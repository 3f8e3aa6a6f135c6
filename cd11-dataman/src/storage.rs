//! Windowed batching of records into a durable store.
//!
//! [`BatchForwarder`] collects records from a channel until a batch is full or the window
//! expires, hands the batch to a [`RecordStore`], and acknowledges it only once stored.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient: the batch is retried until it succeeds.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Permanent for this batch: it is dropped.
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Durable destination for record batches.
pub trait RecordStore<T>: Send + Sync + 'static {
    fn store(&self, batch: &[T]) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Configuration for [`BatchForwarder`].
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    /// Records per batch. Default: 100.
    pub batch_size: usize,
    /// Longest a partial batch waits for more records. Default: 1 second.
    pub window: Duration,
    /// Delay before the first retry of an unavailable store. Default: 500 milliseconds.
    pub initial_backoff: Duration,
    /// Cap on the retry delay. Default: 30 seconds.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub multiplier: f64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            window: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Totals reported when the forwarder stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub batches: u64,
    pub records: u64,
    pub rejected: u64,
    pub retries: u64,
}

type AckFn = Arc<dyn Fn(usize) + Send + Sync>;

pub struct BatchForwarder<S> {
    store: S,
    config: ForwarderConfig,
    on_ack: Option<AckFn>,
}

impl<S> BatchForwarder<S> {
    pub fn new(store: S, config: ForwarderConfig) -> Self {
        Self {
            store,
            config,
            on_ack: None,
        }
    }

    /// Called with the batch size after each batch is durably stored.
    pub fn on_ack(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_ack = Some(Arc::new(f));
        self
    }

    /// Forward until `rx` closes, storing whatever partial batch is left at the end.
    pub async fn run<T>(self, mut rx: mpsc::Receiver<T>) -> ForwardStats
    where
        S: RecordStore<T>,
        T: Send,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut stats = ForwardStats::default();
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            let open = next_window(&mut rx, &mut batch, batch_size, self.config.window).await;
            if !batch.is_empty() {
                self.store_batch(&batch, &mut stats).await;
                batch.clear();
            }
            if !open {
                break;
            }
        }

        info!(
            batches = stats.batches,
            records = stats.records,
            rejected = stats.rejected,
            "batch forwarder stopped"
        );
        stats
    }

    async fn store_batch<T>(&self, batch: &[T], stats: &mut ForwardStats)
    where
        S: RecordStore<T>,
    {
        let mut backoff = self.config.initial_backoff;
        loop {
            match self.store.store(batch).await {
                Ok(()) => {
                    stats.batches += 1;
                    stats.records += batch.len() as u64;
                    debug!(size = batch.len(), "batch stored");
                    if let Some(ack) = &self.on_ack {
                        ack(batch.len());
                    }
                    return;
                }
                Err(StoreError::Unavailable(reason)) => {
                    stats.retries += 1;
                    warn!(%reason, ?backoff, size = batch.len(), "storage unavailable, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff
                        .mul_f64(self.config.multiplier)
                        .min(self.config.max_backoff);
                }
                Err(StoreError::Rejected(reason)) => {
                    stats.rejected += batch.len() as u64;
                    warn!(%reason, size = batch.len(), "batch rejected, dropping");
                    return;
                }
            }
        }
    }
}

/// Fill `batch` until it holds `batch_size` records or `window` has passed since its first
/// record. Returns `false` once `rx` is closed and drained.
async fn next_window<T>(
    rx: &mut mpsc::Receiver<T>,
    batch: &mut Vec<T>,
    batch_size: usize,
    window: Duration,
) -> bool {
    match rx.recv().await {
        Some(first) => batch.push(first),
        None => return false,
    }
    let deadline = Instant::now() + window;
    while batch.len() < batch_size {
        tokio::select! {
            next = rx.recv() => match next {
                Some(record) => batch.push(record),
                None => return false,
            },
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    true
}
