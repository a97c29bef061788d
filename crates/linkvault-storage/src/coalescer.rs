use crate::config::CoalescerSettings;
use linkvault_core::{Result, StorageError, UrlStorage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace};

/// Cheap, cloneable handle for queueing deletions.
///
/// Sending never blocks; ids are applied later by the owning
/// [`DeletionCoalescer`].
#[derive(Debug, Clone)]
pub struct DeletionQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl DeletionQueue {
    /// Queues one short id for deletion.
    pub fn enqueue(&self, short_id: impl Into<String>) -> Result<()> {
        self.tx
            .send(short_id.into())
            .map_err(|_| StorageError::Unavailable("deletion coalescer has stopped".to_string()))
    }

    /// Queues every id in `short_ids`, stopping at the first failure.
    pub fn enqueue_all<I>(&self, short_ids: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        short_ids.into_iter().try_for_each(|id| self.enqueue(id))
    }
}

/// Background worker that batches deletions.
///
/// Buffered ids are flushed through [`UrlStorage::delete_urls`] when the
/// buffer reaches `batch_size`, when `idle_interval` has passed since the
/// first id entered an empty buffer, or on shutdown. A failed flush is
/// logged and the batch is dropped.
#[derive(Debug)]
pub struct DeletionCoalescer {
    queue: DeletionQueue,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl DeletionCoalescer {
    /// Spawns the worker on the current Tokio runtime.
    pub fn spawn<S: UrlStorage>(storage: Arc<S>, settings: CoalescerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run(storage, rx, cancel_rx, settings));

        Self {
            queue: DeletionQueue { tx },
            cancel: Some(cancel_tx),
            handle,
        }
    }

    /// Returns a handle for queueing deletions.
    pub fn queue(&self) -> DeletionQueue {
        self.queue.clone()
    }

    /// Signals the worker and waits for its final flush.
    pub async fn shutdown(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Err(err) = (&mut self.handle).await {
            error!(error = %err, "deletion coalescer task failed");
        }
    }
}

async fn run<S: UrlStorage>(
    storage: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut cancel: oneshot::Receiver<()>,
    settings: CoalescerSettings,
) {
    let batch_size = settings.batch_size.max(1);
    let mut buffer: Vec<String> = Vec::with_capacity(batch_size);
    let idle = sleep(settings.idle_interval);
    tokio::pin!(idle);

    debug!(batch_size, idle_interval = ?settings.idle_interval, "deletion coalescer started");

    loop {
        tokio::select! {
            biased;

            // Fires on an explicit shutdown and when the owner is dropped.
            _ = &mut cancel => {
                // Closing first makes late senders fail instead of being lost.
                rx.close();
                while let Ok(short_id) = rx.try_recv() {
                    buffer.push(short_id);
                }
                flush(storage.as_ref(), &mut buffer).await;
                break;
            }

            received = rx.recv() => match received {
                Some(short_id) => {
                    if buffer.is_empty() {
                        idle.as_mut().reset(Instant::now() + settings.idle_interval);
                    }
                    trace!(short_id = %short_id, "queued deletion");
                    buffer.push(short_id);
                    if buffer.len() >= batch_size {
                        flush(storage.as_ref(), &mut buffer).await;
                    }
                }
                None => {
                    flush(storage.as_ref(), &mut buffer).await;
                    break;
                }
            },

            _ = &mut idle, if !buffer.is_empty() => {
                flush(storage.as_ref(), &mut buffer).await;
            }
        }
    }

    info!("deletion coalescer stopped");
}

async fn flush<S: UrlStorage>(storage: &S, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }

    let batch: Vec<String> = buffer.drain(..).collect();
    match storage.delete_urls(&batch).await {
        Ok(()) => debug!(count = batch.len(), "flushed deletion batch"),
        Err(err) => error!(
            count = batch.len(),
            error = %err,
            "failed to flush deletion batch; dropping it"
        ),
    }
}
