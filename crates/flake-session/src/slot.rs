//! One-value hand-off primitives used to synchronise negotiation and teardown.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot already holds a value")]
    Occupied,
    #[error("slot is closed")]
    Closed,
}

/// Holds at most one value for a single waiter.
///
/// A second `fill` before the waiter takes the first value is rejected rather
/// than queued. Closing the slot wakes the waiter with `None`.
pub struct Slot<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    rx: AsyncMutex<mpsc::Receiver<T>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
        }
    }

    pub fn fill(&self, value: T) -> Result<(), SlotError> {
        let guard = self.tx.lock();
        let sender = guard.as_ref().ok_or(SlotError::Closed)?;
        sender.try_send(value).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SlotError::Occupied,
            mpsc::error::TrySendError::Closed(_) => SlotError::Closed,
        })
    }

    /// Waits for the value. `None` once the slot is closed and empty.
    pub async fn take(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Discards a value left over from an earlier attempt.
    pub fn clear(&self) -> bool {
        match self.rx.try_lock() {
            Ok(mut rx) => rx.try_recv().is_ok(),
            Err(_) => false,
        }
    }

    pub fn close(&self) {
        self.tx.lock().take();
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fire-and-forget notification for whoever supervises the session.
///
/// Firing never blocks. Signals sent while nobody waits collapse into one
/// pending notification.
#[derive(Debug, Default)]
pub struct ResetSignal {
    notify: Notify,
    fired: AtomicU64,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn second_fill_is_rejected() {
        let slot = Slot::new();
        slot.fill(1u32).unwrap();
        assert_eq!(slot.fill(2), Err(SlotError::Occupied));
        assert_eq!(slot.take().await, Some(1));
        slot.fill(3).unwrap();
        assert_eq!(slot.take().await, Some(3));
    }

    #[tokio::test]
    async fn close_wakes_waiter() {
        let slot = Arc::new(Slot::<u32>::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.take().await })
        };
        tokio::task::yield_now().await;
        slot.close();
        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(slot.fill(1), Err(SlotError::Closed));
        assert!(slot.is_closed());
    }

    #[tokio::test]
    async fn clear_drops_stale_value() {
        let slot = Slot::new();
        slot.fill("stale").unwrap();
        assert!(slot.clear());
        assert!(!slot.clear());
        slot.fill("fresh").unwrap();
        assert_eq!(slot.take().await, Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_collapses_unconsumed_signals() {
        let reset = ResetSignal::new();
        reset.fire();
        reset.fire();
        assert_eq!(reset.fired(), 2);

        reset.wait().await;
        let second = tokio::time::timeout(Duration::from_millis(50), reset.wait()).await;
        assert!(second.is_err(), "only one pending notification is retained");
    }
}
