use async_trait::async_trait;
use burrow_core::{Result, ShortUrl};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Writes a batch of records as one all-or-nothing unit.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    async fn write_batch(&self, records: Vec<ShortUrl>) -> Result<()>;
}

/// Collects records and writes them in batches.
///
/// Staging and flushing share one lock, so a flush always sees a stable
/// buffer and records staged during a flush wait for the next one. The
/// buffer is emptied before the batch is written: a failed batch is reported
/// to the caller and not retried.
#[derive(Debug)]
pub struct InsertBuffer<W> {
    writer: Arc<W>,
    pending: Mutex<Vec<ShortUrl>>,
    capacity: usize,
}

impl<W: BatchWriter> InsertBuffer<W> {
    pub fn new(writer: Arc<W>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            writer,
            pending: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Adds a record, flushing when the buffer reaches capacity.
    pub async fn stage(&self, record: ShortUrl) -> Result<()> {
        let mut pending = self.pending.lock().await;
        pending.push(record);

        if pending.len() >= self.capacity {
            self.drain(&mut pending).await?;
        }
        Ok(())
    }

    /// Writes everything staged so far. A no-op when nothing is staged.
    pub async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        self.drain(&mut pending).await
    }

    /// Number of records waiting for the next flush.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn drain(&self, pending: &mut Vec<ShortUrl>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(pending, Vec::with_capacity(self.capacity));
        let count = batch.len();
        self.writer.write_batch(batch).await?;

        debug!(count, "insert buffer flushed");
        Ok(())
    }
}
