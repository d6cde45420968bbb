//! Size- and delay-bounded batching
//!
//! Items pushed into a `Batcher` are buffered by a background task and handed
//! to a `BatchHandler` in bulk. A batch is flushed when it reaches
//! `max_batch_size`, or once no new item arrived for `max_delay` (the
//! deadline restarts with every push), or when the batcher is finished.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::IngestionConfig;
use crate::error::{EngineError, Result};

/// Commits one flushed batch
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    async fn handle(&self, batch: Vec<T>) -> Result<()>;
}

/// Flush triggers of a batcher
#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub max_delay: Duration,
    /// Items buffered in the channel before `push` waits
    pub capacity: usize,
}

impl From<&IngestionConfig> for BatcherConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            max_delay: config.max_batch_delay(),
            capacity: config.record_channel_capacity,
        }
    }
}

/// Totals reported when a batcher finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub items: usize,
}

/// Handle for queuing items into a background batching task
pub struct Batcher<T> {
    sender: mpsc::Sender<T>,
    task: JoinHandle<Result<BatchStats>>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Start the background task flushing into `handler`
    pub fn spawn<H>(config: BatcherConfig, handler: Arc<H>) -> Self
    where
        H: BatchHandler<T> + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let task = tokio::spawn(run(receiver, config, handler));
        Self { sender, task }
    }

    /// Queue an item, waiting while the channel is full.
    ///
    /// Fails once the background task stopped after a handler error; the
    /// error itself is returned by `finish`.
    pub async fn push(&self, item: T) -> Result<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| EngineError::Ingestion("Batcher stopped".to_string()))
    }

    /// Flush what is left and wait for the background task
    pub async fn finish(self) -> Result<BatchStats> {
        drop(self.sender);
        self.task
            .await
            .map_err(|e| EngineError::Ingestion(format!("Batcher task failed: {}", e)))?
    }
}

async fn run<T, H>(
    mut receiver: mpsc::Receiver<T>,
    config: BatcherConfig,
    handler: Arc<H>,
) -> Result<BatchStats>
where
    H: BatchHandler<T> + ?Sized,
{
    let max_batch_size = config.max_batch_size.max(1);
    let mut buffer: Vec<T> = Vec::new();
    let mut stats = BatchStats::default();
    let mut deadline: Option<Instant> = None;

    loop {
        let received = match deadline {
            Some(at) => match tokio::time::timeout_at(at, receiver.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    flush(&mut buffer, handler.as_ref(), &mut stats).await?;
                    deadline = None;
                    continue;
                }
            },
            None => receiver.recv().await,
        };

        let Some(item) = received else {
            break;
        };
        buffer.push(item);
        if buffer.len() >= max_batch_size {
            flush(&mut buffer, handler.as_ref(), &mut stats).await?;
            deadline = None;
        } else {
            deadline = Some(Instant::now() + config.max_delay);
        }
    }

    flush(&mut buffer, handler.as_ref(), &mut stats).await?;
    Ok(stats)
}

async fn flush<T, H>(buffer: &mut Vec<T>, handler: &H, stats: &mut BatchStats) -> Result<()>
where
    H: BatchHandler<T> + ?Sized,
{
    if buffer.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(buffer);
    log::info!("Doing batch request with {} items", batch.len());
    stats.batches += 1;
    stats.items += batch.len();
    handler.handle(batch).await
}
