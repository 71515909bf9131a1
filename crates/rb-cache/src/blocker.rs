//! Rebuild gate.
//!
//! Every cache operation passes through the gate. While a rebuild holds it,
//! readers and writers alike wait (no error, no timeout) and resume against
//! the rebuilt state once it is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// `Open -> Blocked` via [`Blocker::start`], `Blocked -> Open` via
/// [`Blocker::close`].
///
/// Ordinary operations share the gate with each other; only a rebuild or a
/// coarse delete takes it exclusively. Waiting writers are queued ahead of
/// later arrivals, so once `start` is pending no new operation slips in.
pub struct Blocker {
    gate: Arc<RwLock<()>>,
    held: Mutex<Option<OwnedRwLockWriteGuard<()>>>,
    blocked: AtomicBool,
}

impl Default for Blocker {
    fn default() -> Self {
        Self::new()
    }
}

impl Blocker {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            held: Mutex::new(None),
            blocked: AtomicBool::new(false),
        }
    }

    /// Blocks the gate once in-flight operations have drained. Calling it
    /// while already blocked is a no-op.
    pub async fn start(&self) {
        let mut held = self.held.lock().await;
        if held.is_some() {
            debug!("rebuild gate already blocked");
            return;
        }
        *held = Some(self.gate.clone().write_owned().await);
        self.blocked.store(true, Ordering::Release);
        info!("rebuild gate blocked");
    }

    /// Reopens the gate and wakes every waiter. No-op when open.
    pub async fn close(&self) {
        let mut held = self.held.lock().await;
        if held.take().is_some() {
            self.blocked.store(false, Ordering::Release);
            info!("rebuild gate open");
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Shared passage for a single cache operation.
    pub(crate) async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Sole passage, for deletes that must not interleave with any reader.
    pub(crate) async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn start_holds_entries_until_close() {
        let blocker = Arc::new(Blocker::new());
        blocker.start().await;
        assert!(blocker.is_blocked());

        let waiter = {
            let blocker = blocker.clone();
            tokio::spawn(async move {
                let _open = blocker.enter().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        blocker.close().await;
        waiter.await.unwrap();
        assert!(!blocker.is_blocked());
    }

    #[tokio::test]
    async fn start_is_reentrant_and_close_is_idempotent() {
        let blocker = Blocker::new();
        blocker.start().await;
        blocker.start().await;
        blocker.close().await;
        blocker.close().await;
        let _open = blocker.enter().await;
    }

    #[tokio::test]
    async fn start_waits_for_in_flight_operations() {
        let blocker = Arc::new(Blocker::new());
        let in_flight = blocker.enter().await;

        let starter = {
            let blocker = blocker.clone();
            tokio::spawn(async move { blocker.start().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!blocker.is_blocked());

        drop(in_flight);
        starter.await.unwrap();
        assert!(blocker.is_blocked());
        blocker.close().await;
    }
}
