use crate::error::QueueError;
use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Bounded FIFO handoff of document ids from the gateway to the workers.
///
/// An id stays reserved from enqueue until a worker calls [`complete`], so the
/// same document can never be queued or processed twice at once.
///
/// [`complete`]: DispatchQueue::complete
pub struct DispatchQueue {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    in_flight: DashSet<String>,
    closed: CancellationToken,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            in_flight: DashSet::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Enqueue without waiting. Used by the gateway, which must not block.
    pub fn try_enqueue(&self, document_id: &str) -> Result<(), QueueError> {
        self.reserve(document_id)?;

        match self.tx.try_send(document_id.to_string()) {
            Ok(()) => {
                self.publish_depth();
                Ok(())
            }
            Err(e) => {
                self.in_flight.remove(document_id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    /// Enqueue, waiting for capacity. Fails only if the queue closes first.
    pub async fn enqueue(&self, document_id: &str) -> Result<(), QueueError> {
        self.reserve(document_id)?;

        let sent = tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(document_id.to_string());
                    Ok(())
                }
                Err(_) => Err(QueueError::Closed),
            },
            _ = self.closed.cancelled() => Err(QueueError::Closed),
        };

        match sent {
            Ok(()) => {
                self.publish_depth();
                Ok(())
            }
            Err(e) => {
                self.in_flight.remove(document_id);
                Err(e)
            }
        }
    }

    /// Next id in FIFO order. Each id is handed to exactly one caller.
    ///
    /// Returns `None` once the queue is closed and its buffer is drained.
    pub async fn dequeue(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;

        let next = if self.closed.is_cancelled() {
            rx.try_recv().ok()
        } else {
            tokio::select! {
                biased;
                id = rx.recv() => id,
                _ = self.closed.cancelled() => rx.try_recv().ok(),
            }
        };

        if next.is_some() {
            self.publish_depth();
        }
        next
    }

    /// Release a document id after its processing attempt ends.
    pub fn complete(&self, document_id: &str) {
        self.in_flight.remove(document_id);
    }

    pub fn is_in_flight(&self, document_id: &str) -> bool {
        self.in_flight.contains(document_id)
    }

    /// Ids buffered and not yet handed to a worker.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Stop accepting work. Buffered ids can still be dequeued.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::info!(depth = self.depth(), "Closing dispatch queue");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn reserve(&self, document_id: &str) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        if !self.in_flight.insert(document_id.to_string()) {
            return Err(QueueError::AlreadyQueued(document_id.to_string()));
        }
        Ok(())
    }

    fn publish_depth(&self) {
        metrics::gauge!("document_queue_depth").set(self.depth() as f64);
    }
}
