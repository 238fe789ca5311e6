//! In-process work queue
//!
//! Bounded channel plus a lease table. A dequeued message stays leased until
//! it is finished; if its lease runs out the reaper makes it visible again.

use crate::domain::ports::{OperationQueue, QueueMessage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-memory [`OperationQueue`]
pub struct MemoryQueue {
    sender: mpsc::Sender<QueueMessage>,
    receiver: Mutex<mpsc::Receiver<QueueMessage>>,
    /// Leased messages by message id, with lease expiry
    in_flight: DashMap<Uuid, (QueueMessage, Instant)>,
    lease: Duration,
    closed: CancellationToken,
}

impl MemoryQueue {
    pub fn new(capacity: usize, lease: Duration) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
            in_flight: DashMap::new(),
            lease,
            closed: CancellationToken::new(),
        })
    }

    /// Stop handing out messages; pending dequeues return `None`
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Requeue every message whose lease has expired
    ///
    /// A message that does not fit in the channel stays leased and expired.
    pub fn reclaim_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|r| r.value().1 <= now)
            .map(|r| *r.key())
            .collect();

        let mut reclaimed = 0;
        for message_id in expired {
            if let Some((_, (message, _))) = self.in_flight.remove(&message_id) {
                match self.sender.try_send(message) {
                    Ok(()) => reclaimed += 1,
                    Err(e) => {
                        // Keep the lease expired so the next pass tries again
                        warn!("Failed to redeliver message {}: {}", message_id, e);
                        self.in_flight.insert(message_id, (e.into_inner(), now));
                    }
                }
            }
        }
        if reclaimed > 0 {
            debug!("Reclaimed {} expired leases", reclaimed);
        }
        reclaimed
    }

    /// Periodically reclaim expired leases until the queue closes
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = queue.closed.cancelled() => break,
                    _ = ticker.tick() => {
                        queue.reclaim_expired();
                    }
                }
            }
        })
    }
}

#[async_trait]
impl OperationQueue for MemoryQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        self.sender.send(message).await.map_err(|_| Error::QueueClosed)
    }

    async fn enqueue_after(&self, message: QueueMessage, delay: Duration) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        let sender = self.sender.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if sender.send(message).await.is_err() {
                        warn!("Queue closed before delayed message was delivered");
                    }
                }
            }
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>> {
        let mut receiver = self.receiver.lock().await;
        let next = tokio::select! {
            _ = self.closed.cancelled() => None,
            message = receiver.recv() => message,
        };

        Ok(next.map(|mut message| {
            message.dequeue_count += 1;
            self.in_flight
                .insert(message.message_id, (message.clone(), Instant::now() + self.lease));
            message
        }))
    }

    async fn extend(&self, message: &QueueMessage, lease: Duration) -> Result<()> {
        match self.in_flight.get_mut(&message.message_id) {
            Some(mut entry) => {
                entry.value_mut().1 = Instant::now() + lease;
                Ok(())
            }
            None => Err(Error::Internal(format!(
                "lease for message {} is no longer held",
                message.message_id
            ))),
        }
    }

    async fn finish(&self, message: &QueueMessage) -> Result<()> {
        self.in_flight.remove(&message.message_id);
        Ok(())
    }
}
