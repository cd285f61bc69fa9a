//! Load/reload/save orchestration for one subscription file.
//!
//! The [`SyncController`] is driven exclusively by the account's serial
//! queue. A load goes through these steps:
//!
//! 1. `Idle → Loading`.
//! 2. Coordinated read of the file.
//! 3. Parse into a forest of items.
//! 4. Lock the model and suppress its change signals; inside one
//!    batched-update scope, on reload clear the top-level feeds, then hand
//!    the forest to the model.
//! 5. `Loading → Idle`.
//!
//! Failures at any step are logged and absorbed: the model is left as it was
//! and the caller gets a [`LoadOutcome`] / [`SaveOutcome`] describing what
//! happened.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use opmlsync_core::batch::BatchScope;
use opmlsync_core::errors::FileAccessError;
use opmlsync_core::models::Item;
use opmlsync_core::opml;
use opmlsync_core::subscriptions::SubscriptionModel;

use crate::coordination::FileCoordinator;
use crate::dirty::SyncState;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Phase of the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Loading,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
        }
    }
}

/// Which kind of load is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// First population of an empty model.
    Initial,
    /// Re-read after an external change; replaces top-level feeds.
    Reload,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "load"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Result of a load or reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The document was parsed and `items` top-level items were applied.
    Applied { items: usize },
    /// The file does not exist.
    NoDocument,
    /// The file matches what was last read or written; nothing applied.
    Unchanged,
    /// The file could not be read.
    ReadFailed,
    /// The file is not a valid OPML document.
    ParseFailed,
}

/// Result of a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing to persist.
    Clean,
    /// The model was deleted; the save was skipped.
    Deleted,
    /// The document was written.
    Written { bytes: usize },
    /// The write failed; the dirty flag was restored.
    Failed,
}

/// Counters for one account's sync activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub loads: u64,
    pub reloads: u64,
    pub saves: u64,
    pub skipped_saves: u64,
    pub read_errors: u64,
    pub parse_errors: u64,
    pub write_errors: u64,
    pub last_saved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Moves documents between the coordinated file and the model.
pub struct SyncController<M: SubscriptionModel> {
    state: Arc<SyncState>,
    model: Arc<Mutex<M>>,
    batch: Arc<dyn BatchScope>,
    coordinator: Arc<dyn FileCoordinator>,
    /// SHA-256 of the document last read or written.
    last_digest: Option<String>,
    stats: Arc<Mutex<SyncStats>>,
    phase: ControllerState,
}

impl<M: SubscriptionModel> SyncController<M> {
    pub fn new(
        state: Arc<SyncState>,
        model: Arc<Mutex<M>>,
        batch: Arc<dyn BatchScope>,
        coordinator: Arc<dyn FileCoordinator>,
    ) -> Self {
        Self {
            state,
            model,
            batch,
            coordinator,
            last_digest: None,
            stats: Arc::new(Mutex::new(SyncStats::default())),
            phase: ControllerState::Idle,
        }
    }

    pub fn phase(&self) -> ControllerState {
        self.phase
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn stats(&self) -> Arc<Mutex<SyncStats>> {
        Arc::clone(&self.stats)
    }

    /// Initial population from the file. A missing file is the first-run case.
    pub async fn load(&mut self) -> LoadOutcome {
        self.load_document(LoadMode::Initial).await
    }

    /// Re-read the file and replace the model's top-level feeds.
    ///
    /// A document whose digest equals the last one this controller read or
    /// wrote is skipped as [`LoadOutcome::Unchanged`]. That includes an
    /// external tool restoring an earlier document after the model has since
    /// diverged locally: the local state stays and wins on the next save.
    pub async fn reload(&mut self) -> LoadOutcome {
        self.load_document(LoadMode::Reload).await
    }

    async fn load_document(&mut self, mode: LoadMode) -> LoadOutcome {
        self.phase = ControllerState::Loading;
        let outcome = self.read_and_apply(mode).await;
        self.phase = ControllerState::Idle;
        outcome
    }

    async fn read_and_apply(&mut self, mode: LoadMode) -> LoadOutcome {
        let state = Arc::clone(&self.state);
        let path = state.file_path();
        debug!(path = %path.display(), mode = %mode, phase = %self.phase, "loading document");

        let bytes = match self.read_bytes(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                match mode {
                    LoadMode::Initial => {
                        info!(path = %path.display(), "no document yet; starting empty")
                    }
                    LoadMode::Reload => warn!(
                        path = %path.display(),
                        "document disappeared; keeping in-memory subscriptions"
                    ),
                }
                return LoadOutcome::NoDocument;
            }
            Err(e) => {
                self.record(|s| s.read_errors += 1);
                error!(path = %path.display(), mode = %mode, error = %e, "failed to read document");
                return LoadOutcome::ReadFailed;
            }
        };

        let digest = digest_of(&bytes);
        if mode == LoadMode::Reload && self.last_digest.as_deref() == Some(digest.as_str()) {
            debug!(path = %path.display(), "document unchanged since last sync; skipping reload");
            return LoadOutcome::Unchanged;
        }

        let document = match opml::parse(&bytes) {
            Ok(document) => document,
            Err(e) => {
                self.record(|s| s.parse_errors += 1);
                error!(path = %path.display(), mode = %mode, error = %e, "failed to parse document; model left untouched");
                return LoadOutcome::ParseFailed;
            }
        };

        let count = document.items.len();
        self.apply(mode, document.items);
        self.last_digest = Some(digest);
        self.record(|s| match mode {
            LoadMode::Initial => s.loads += 1,
            LoadMode::Reload => s.reloads += 1,
        });

        info!(path = %path.display(), mode = %mode, items = count, "document applied");
        LoadOutcome::Applied { items: count }
    }

    /// Hand `items` to the model inside one batched-update scope.
    ///
    /// Dirty marks are suppressed only while the model lock is held, so edits
    /// the host makes during the read are still saved.
    fn apply(&self, mode: LoadMode, items: Vec<Item>) {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        // Declared after `model` so it drops before the lock is released.
        let _loading = self.state.begin_loading();
        let mut items = Some(items);
        self.batch.perform(&mut || {
            if mode == LoadMode::Reload {
                model.clear_top_level_feeds();
            }
            if let Some(items) = items.take() {
                model.load_items(items, None);
            }
        });
    }

    /// Write the model to the file if it has unsaved changes.
    ///
    /// The dirty flag is cleared before the snapshot is taken, under the model
    /// lock, so a change made after the snapshot marks the model dirty again
    /// and schedules another save.
    pub async fn save_if_needed(&mut self) -> SaveOutcome {
        let path = self.state.file_path().to_path_buf();
        if !self.state.is_dirty() {
            return SaveOutcome::Clean;
        }

        let document = {
            let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            if model.is_deleted() {
                self.record(|s| s.skipped_saves += 1);
                debug!(path = %path.display(), "model deleted; skipping save");
                return SaveOutcome::Deleted;
            }
            self.state.set_dirty(false);
            opml::document(&model.display_name(), &model.serialized_form(0))
        };

        let bytes = document.into_bytes();
        let len = bytes.len();
        let digest = digest_of(&bytes);

        match self.write_bytes(&path, bytes).await {
            Ok(()) => {
                self.last_digest = Some(digest);
                self.record(|s| {
                    s.saves += 1;
                    s.last_saved_at = Some(Utc::now());
                });
                info!(path = %path.display(), bytes = len, "subscriptions saved");
                SaveOutcome::Written { bytes: len }
            }
            Err(e) => {
                self.state.restore_dirty();
                self.record(|s| s.write_errors += 1);
                error!(path = %path.display(), error = %e, "failed to save subscriptions; will retry on next change");
                SaveOutcome::Failed
            }
        }
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FileAccessError> {
        let coordinator = Arc::clone(&self.coordinator);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || coordinator.locked_read(&owned))
            .await
            .map_err(|e| join_error(path, e))?
    }

    async fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<(), FileAccessError> {
        let coordinator = Arc::clone(&self.coordinator);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || coordinator.locked_write(&owned, &bytes))
            .await
            .map_err(|e| join_error(path, e))?
    }

    fn record(&self, update: impl FnOnce(&mut SyncStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

fn join_error(path: &Path, e: tokio::task::JoinError) -> FileAccessError {
    FileAccessError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("file I/O task failed: {e}")),
    }
}

/// Hex-encoded SHA-256 of a document.
pub fn digest_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
