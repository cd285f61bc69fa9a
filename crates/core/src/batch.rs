//! Batched-update scope.
//!
//! Model changes posted while a batch is open are coalesced into a single
//! [`UpdateNotice`] that is broadcast when the outermost batch closes. Changes
//! posted outside a batch are broadcast immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::trace;

/// Wraps a critical section so observers see one coalesced notification.
pub trait BatchScope: Send + Sync {
    fn perform(&self, critical_section: &mut dyn FnMut());
}

/// Notification sent to downstream observers after the model changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateNotice {
    /// How many individual changes this notice stands for.
    pub changes: usize,
}

#[derive(Debug, Default)]
struct BatchState {
    depth: usize,
    pending: usize,
}

/// Default [`BatchScope`] backed by a `tokio` broadcast channel.
#[derive(Debug)]
pub struct BatchUpdate {
    state: Mutex<BatchState>,
    tx: broadcast::Sender<UpdateNotice>,
    sent: AtomicU64,
}

impl BatchUpdate {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(BatchState::default()),
            tx,
            sent: AtomicU64::new(0),
        }
    }

    /// Subscribe to update notices.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateNotice> {
        self.tx.subscribe()
    }

    /// Record one model change.
    pub fn post_change(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.depth > 0 {
            state.pending += 1;
            return;
        }
        drop(state);
        self.emit(1);
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .depth
            > 0
    }

    /// Total notices broadcast so far.
    pub fn notifications_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .depth += 1;
    }

    fn exit(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 || state.pending == 0 {
            return;
        }
        let changes = std::mem::take(&mut state.pending);
        drop(state);
        self.emit(changes);
    }

    fn emit(&self, changes: usize) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        trace!(changes, "broadcasting model update");
        // No receivers is fine.
        let _ = self.tx.send(UpdateNotice { changes });
    }
}

impl Default for BatchUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchScope for BatchUpdate {
    fn perform(&self, critical_section: &mut dyn FnMut()) {
        self.enter();
        let _guard = ExitGuard { batch: self };
        critical_section();
    }
}

/// Closes the batch even if the critical section panics.
struct ExitGuard<'a> {
    batch: &'a BatchUpdate,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.batch.exit();
    }
}
