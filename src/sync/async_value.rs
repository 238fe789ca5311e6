//! Single-slot future
//!
//! A write-once, read-many box. The first `put`/`put_err` wins; every waiter,
//! current and future, observes that same outcome. Waiters race the slot
//! against a deadline or a cancellation token, and giving up never consumes
//! the value.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type Slot<T> = Option<std::result::Result<T, Arc<Error>>>;

/// Write-once value shared between one producer and many waiters
pub struct AsyncValue<T> {
    slot: Mutex<Slot<T>>,
    ready: Notify,
}

impl<T: Clone> AsyncValue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Notify::new(),
        }
    }

    /// Store a value; returns false if the slot was already written
    pub fn put(&self, value: T) -> bool {
        self.fill(Ok(value))
    }

    /// Store an error; returns false if the slot was already written
    pub fn put_err(&self, err: Error) -> bool {
        self.fill(Err(Arc::new(err)))
    }

    fn fill(&self, outcome: std::result::Result<T, Arc<Error>>) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.ready.notify_waiters();
        true
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Read the outcome without waiting
    pub fn try_get(&self) -> Option<Result<T>> {
        self.slot.lock().as_ref().map(to_result)
    }

    /// Wait with no deadline
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout`, failing with `DeadlineExceeded`
    pub async fn get(&self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    /// Wait until set, canceled (`Canceled`) or past `timeout` (`DeadlineExceeded`)
    pub async fn get_with_cancel(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            outcome = self.wait() => outcome,
            _ = cancel.cancelled() => Err(Error::Canceled),
            _ = deadline => Err(Error::DeadlineExceeded),
        }
    }
}

impl<T: Clone> Default for AsyncValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn to_result<T: Clone>(outcome: &std::result::Result<T, Arc<Error>>) -> Result<T> {
    match outcome {
        Ok(value) => Ok(value.clone()),
        Err(err) => Err(Error::Shared(Arc::clone(err))),
    }
}
