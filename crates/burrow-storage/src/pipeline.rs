//! Asynchronous batched soft-delete pipeline.
//!
//! Callers hand over deletions and return at once. A spawned task feeds one
//! queue item per short id, followed by a flush marker, into a bounded
//! channel. A single worker collects items into a batch and hands full
//! batches (or whatever is pending when a flush marker arrives) to a
//! [`DeleteApplier`].
//!
//! Shutdown is driven by a [`CancellationToken`]: once cancelled, new
//! requests fail with [`StorageError::Closed`], already spawned enqueue tasks
//! finish, the queue closes and the worker applies what is left before
//! reporting [`PipelineState::Stopped`].

use crate::settings::PipelineSettings;
use async_trait::async_trait;
use burrow_core::{Result, ShortId, StorageError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One soft-delete request: `user_id` asks to delete `short_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub short_id: ShortId,
    pub user_id: Uuid,
}

/// Applies a batch of deletions atomically.
///
/// Ownership is checked here, at apply time. Requests for unknown short ids
/// or for records owned by someone else are skipped without error.
#[async_trait]
pub trait DeleteApplier: Send + Sync + 'static {
    async fn apply_deletions(&self, batch: &[DeleteRequest]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Buffering,
    Flushing,
    Stopped,
}

/// Reaction to a batch that could not be applied.
#[derive(Clone)]
pub struct FlushFailureHandler(Arc<dyn Fn(&StorageError) + Send + Sync>);

impl FlushFailureHandler {
    pub fn new(handler: impl Fn(&StorageError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    /// Logs the failure and terminates the process.
    pub fn fatal() -> Self {
        Self::new(|err| {
            error!(error = %err, "failed to apply deletions, terminating");
            std::process::exit(1);
        })
    }

    /// Logs the failure and keeps the pipeline running. The batch is lost.
    pub fn log() -> Self {
        Self::new(|err| {
            error!(error = %err, "failed to apply deletions, batch dropped");
        })
    }

    fn call(&self, err: &StorageError) {
        (self.0)(err)
    }
}

impl Default for FlushFailureHandler {
    fn default() -> Self {
        Self::fatal()
    }
}

impl fmt::Debug for FlushFailureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FlushFailureHandler")
    }
}

enum Command {
    Delete(DeleteRequest),
    Flush,
}

type SharedSender = Arc<Mutex<Option<mpsc::Sender<Command>>>>;

/// Handle to a running delete pipeline.
///
/// Dropping the handle starts the shutdown but does not wait for it.
#[derive(Debug)]
pub struct DeletePipeline {
    sender: SharedSender,
    tracker: TaskTracker,
    token: CancellationToken,
    state: watch::Receiver<PipelineState>,
}

impl DeletePipeline {
    /// Starts the worker and the shutdown watcher. Must be called from
    /// within a tokio runtime.
    ///
    /// The pipeline stops when `shutdown` (or the pipeline itself) is cancelled.
    pub fn spawn<A: DeleteApplier>(
        applier: Arc<A>,
        settings: PipelineSettings,
        shutdown: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));
        let tracker = TaskTracker::new();
        let token = shutdown.child_token();

        tokio::spawn(run_worker(
            applier,
            rx,
            state_tx,
            settings.delete_batch_size.max(1),
            settings.on_flush_failure,
        ));

        tokio::spawn({
            let token = token.clone();
            let tracker = tracker.clone();
            let sender = Arc::clone(&sender);
            async move {
                token.cancelled().await;
                tracker.close();
                tracker.wait().await;
                // The worker exits once the last sender is gone.
                sender.lock().take();
                debug!("delete queue closed");
            }
        });

        Self {
            sender,
            tracker,
            token,
            state: state_rx,
        }
    }

    /// Queues `short_ids` for deletion on behalf of `user_id`.
    ///
    /// Returns as soon as the work is handed to a background task.
    pub fn request_delete(&self, user_id: Uuid, short_ids: Vec<ShortId>) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(StorageError::Closed);
        }
        if short_ids.is_empty() {
            return Ok(());
        }

        let Some(sender) = self.sender.lock().clone() else {
            return Err(StorageError::Closed);
        };

        debug!(user_id = %user_id, count = short_ids.len(), "deletion requested");

        self.tracker.spawn(async move {
            for short_id in short_ids {
                let request = DeleteRequest { short_id, user_id };
                if sender.send(Command::Delete(request)).await.is_err() {
                    warn!(user_id = %user_id, "delete queue closed while enqueueing");
                    return;
                }
            }
            let _ = sender.send(Command::Flush).await;
        });

        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Stops accepting requests and waits until everything queued is applied.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.wait_stopped().await;
    }

    /// Waits until the worker has drained the queue and stopped.
    pub async fn wait_stopped(&self) {
        let mut state = self.state.clone();
        // An error means the worker is gone, which only happens after Stopped.
        let _ = state.wait_for(|s| *s == PipelineState::Stopped).await;
    }
}

impl Drop for DeletePipeline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_worker<A: DeleteApplier>(
    applier: Arc<A>,
    mut queue: mpsc::Receiver<Command>,
    state: watch::Sender<PipelineState>,
    batch_size: usize,
    on_failure: FlushFailureHandler,
) {
    let mut pending = Vec::with_capacity(batch_size);

    while let Some(command) = queue.recv().await {
        match command {
            Command::Delete(request) => {
                pending.push(request);
                state.send_replace(PipelineState::Buffering);
                if pending.len() >= batch_size {
                    flush(applier.as_ref(), &mut pending, &state, &on_failure).await;
                }
            }
            Command::Flush => {
                if !pending.is_empty() {
                    flush(applier.as_ref(), &mut pending, &state, &on_failure).await;
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(applier.as_ref(), &mut pending, &state, &on_failure).await;
    }

    state.send_replace(PipelineState::Stopped);
    info!("delete pipeline stopped");
}

async fn flush<A: DeleteApplier>(
    applier: &A,
    pending: &mut Vec<DeleteRequest>,
    state: &watch::Sender<PipelineState>,
    on_failure: &FlushFailureHandler,
) {
    state.send_replace(PipelineState::Flushing);
    let batch = std::mem::take(pending);

    match applier.apply_deletions(&batch).await {
        Ok(()) => debug!(count = batch.len(), "deletion batch applied"),
        Err(err) => on_failure.call(&err),
    }

    state.send_replace(PipelineState::Idle);
}
