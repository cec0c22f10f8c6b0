//! Single-slot latch for asynchronous operations.
//!
//! The first caller claims the slot *before* awaiting anything and runs the
//! operation. Callers that arrive while it is pending subscribe to the same
//! result instead of issuing a duplicate request.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

type Slot<T> = Mutex<Option<watch::Receiver<Option<T>>>>;

pub struct InFlight<T: Clone> {
    slot: Slot<T>,
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T: Clone> fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `operation`, or join the one already in flight.
    ///
    /// Returns `None` only for a follower whose leader was dropped before it
    /// produced a value.
    pub async fn run<F, Fut>(&self, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (leader, mut waiter) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(rx) => (None, rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    (Some(tx), rx)
                }
            }
        };

        match leader {
            Some(tx) => {
                let _release = Release { slot: &self.slot };
                let value = operation().await;
                tx.send_replace(Some(value.clone()));
                Some(value)
            }
            None => {
                let value = waiter.wait_for(|value| value.is_some()).await.ok()?;
                (*value).clone()
            }
        }
    }
}

/// Frees the slot when the leader finishes or is cancelled.
struct Release<'a, T> {
    slot: &'a Slot<T>,
}

impl<T> Drop for Release<'_, T> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
