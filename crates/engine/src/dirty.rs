//! Dirty-state tracking.
//!
//! [`SyncState`] holds the two flags that gate persistence: `is_dirty` (the
//! model has changes the file does not) and `is_loading` (a load is applying
//! file contents to the model, so changes it causes must not be saved back).
//! Flag changes go through [`SyncState::set_dirty`], which reports what the
//! caller must do next instead of doing it as a side effect.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::{debug, trace};

use opmlsync_core::subscriptions::DirtyObserver;

use crate::scheduler::QueueCommand;

/// What a `set_dirty` call requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyTransition {
    /// A load is in progress; the request was ignored.
    Suppressed,
    /// The flag already had the requested value.
    Unchanged,
    /// The flag is set; a save must be scheduled.
    ScheduleSave,
    /// The flag went from set to clear.
    Cleared,
}

/// Per-file persistence flags shared by the tracker and the controller.
#[derive(Debug)]
pub struct SyncState {
    file_path: PathBuf,
    is_dirty: AtomicBool,
    is_loading: AtomicBool,
}

impl SyncState {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            is_dirty: AtomicBool::new(false),
            is_loading: AtomicBool::new(false),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading.load(Ordering::SeqCst)
    }

    /// Request a dirty-flag change.
    ///
    /// While loading every request is [`DirtyTransition::Suppressed`]. Setting
    /// the flag always yields [`DirtyTransition::ScheduleSave`], even when it
    /// was already set: the scheduler coalesces repeats.
    pub fn set_dirty(&self, dirty: bool) -> DirtyTransition {
        if self.is_loading() {
            return DirtyTransition::Suppressed;
        }
        let was = self.is_dirty.swap(dirty, Ordering::SeqCst);
        match (was, dirty) {
            (_, true) => DirtyTransition::ScheduleSave,
            (true, false) => DirtyTransition::Cleared,
            (false, false) => DirtyTransition::Unchanged,
        }
    }

    /// Put the flag back after a failed write, without scheduling anything.
    pub fn restore_dirty(&self) {
        self.is_dirty.store(true, Ordering::SeqCst);
    }

    /// Enter the loading phase until the returned guard is dropped.
    pub fn begin_loading(&self) -> LoadingGuard<'_> {
        self.is_loading.store(true, Ordering::SeqCst);
        LoadingGuard { state: self }
    }
}

/// Clears `is_loading` on drop, including on unwind.
#[derive(Debug)]
pub struct LoadingGuard<'a> {
    state: &'a SyncState,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.is_loading.store(false, Ordering::SeqCst);
    }
}

/// Turns model change signals into queued saves.
///
/// Holds only a weak handle to the queue, so a model that owns its tracker
/// does not keep the account's worker alive.
#[derive(Debug)]
pub struct DirtyTracker {
    state: Arc<SyncState>,
    queue: WeakUnboundedSender<QueueCommand>,
}

impl DirtyTracker {
    pub fn new(state: Arc<SyncState>, queue: WeakUnboundedSender<QueueCommand>) -> Self {
        Self { state, queue }
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Mark the model dirty and schedule a save unless a load is running.
    pub fn mark(&self) -> DirtyTransition {
        let transition = self.state.set_dirty(true);
        match transition {
            DirtyTransition::Suppressed => {
                trace!(path = %self.state.file_path().display(), "dirty mark suppressed during load");
            }
            DirtyTransition::ScheduleSave => {
                let sent = self
                    .queue
                    .upgrade()
                    .map(|tx| tx.send(QueueCommand::ScheduleSave).is_ok())
                    .unwrap_or(false);
                if !sent {
                    debug!(
                        path = %self.state.file_path().display(),
                        "sync queue closed; dirty state will not be saved"
                    );
                }
            }
            DirtyTransition::Unchanged | DirtyTransition::Cleared => {}
        }
        transition
    }
}

impl DirtyObserver for DirtyTracker {
    fn mark_dirty(&self) {
        self.mark();
    }
}
