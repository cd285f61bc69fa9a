//! The host-facing handle for one synchronized subscription file.
//!
//! A [`SyncAccount`] owns everything scoped to the account's lifetime: the
//! serial queue worker, the external-change registration, and the dirty
//! tracker the model reports to. Dropping the handle closes the queue; the
//! worker flushes dirty state and exits. [`SyncAccount::shutdown`] does the
//! same and waits for it.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use opmlsync_core::batch::{BatchScope, BatchUpdate};
use opmlsync_core::config::SyncConfig;
use opmlsync_core::errors::SyncError;
use opmlsync_core::subscriptions::{DirtyObserver, SubscriptionList, SubscriptionModel};

use crate::controller::{LoadOutcome, SaveOutcome, SyncController, SyncStats};
use crate::coordination::{ChangeCallback, FileCoordinator, LockFileCoordinator, PresenterRegistration};
use crate::dirty::{DirtyTracker, DirtyTransition, SyncState};
use crate::scheduler::{QueueCommand, SaveScheduler};

/// A subscription model kept in sync with one OPML file.
pub struct SyncAccount<M: SubscriptionModel + 'static> {
    state: Arc<SyncState>,
    model: Arc<Mutex<M>>,
    tracker: Arc<DirtyTracker>,
    queue: mpsc::UnboundedSender<QueueCommand>,
    stats: Arc<Mutex<SyncStats>>,
    presenter: Option<PresenterRegistration>,
    worker: JoinHandle<()>,
}

impl<M: SubscriptionModel + 'static> SyncAccount<M> {
    /// Start the account's queue worker and register for external changes.
    ///
    /// Must be called from within a tokio runtime. The model is not loaded;
    /// call [`SyncAccount::load`] once the host is ready. The caller is
    /// responsible for routing the model's change signals to
    /// [`SyncAccount::dirty_observer`].
    pub fn start(
        config: &SyncConfig,
        model: Arc<Mutex<M>>,
        batch: Arc<dyn BatchScope>,
        coordinator: Arc<dyn FileCoordinator>,
    ) -> anyhow::Result<Self> {
        config
            .validate()
            .context("invalid sync configuration")?;
        let runtime =
            Handle::try_current().context("sync account must be started inside a tokio runtime")?;

        let path = config.file.path.clone();
        let state = Arc::new(SyncState::new(&path));
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(DirtyTracker::new(Arc::clone(&state), tx.downgrade()));

        let controller = SyncController::new(
            Arc::clone(&state),
            Arc::clone(&model),
            batch,
            Arc::clone(&coordinator),
        );
        let stats = controller.stats();
        let worker = runtime.spawn(SaveScheduler::new(controller, rx, config.save.debounce()).run());

        let presenter = if config.watch.enabled {
            register_presenter(coordinator.as_ref(), &path, &tx)
        } else {
            None
        };

        info!(
            path = %path.display(),
            debounce_ms = config.save.debounce_ms,
            watching = presenter.is_some(),
            "sync account started"
        );

        Ok(Self {
            state,
            model,
            tracker,
            queue: tx,
            stats,
            presenter,
            worker,
        })
    }

    /// Populate the model from the file. A missing file yields
    /// [`LoadOutcome::NoDocument`].
    pub async fn load(&self) -> Result<LoadOutcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.submit(QueueCommand::Load(Some(reply)))?;
        outcome.await.map_err(|_| self.closed())
    }

    /// Re-read the file and replace the model's top-level feeds.
    pub async fn reload(&self) -> Result<LoadOutcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.submit(QueueCommand::Reload(Some(reply)))?;
        outcome.await.map_err(|_| self.closed())
    }

    /// Save now if dirty instead of waiting for the debounce interval.
    pub async fn flush(&self) -> Result<SaveOutcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.submit(QueueCommand::Flush(reply))?;
        outcome.await.map_err(|_| self.closed())
    }

    /// Resolve once every command queued before this call has run.
    pub async fn settle(&self) -> Result<(), SyncError> {
        let (reply, done) = oneshot::channel();
        self.submit(QueueCommand::Settle(reply))?;
        done.await.map_err(|_| self.closed())
    }

    /// Record that the model changed and needs persisting.
    pub fn mark_as_dirty(&self) -> DirtyTransition {
        self.tracker.mark()
    }

    /// The observer to install on the model so its edits are saved.
    pub fn dirty_observer(&self) -> Arc<dyn DirtyObserver> {
        self.tracker.clone()
    }

    pub fn model(&self) -> &Arc<Mutex<M>> {
        &self.model
    }

    pub fn file_path(&self) -> &Path {
        self.state.file_path()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Whether external changes are being watched.
    pub fn is_watching(&self) -> bool {
        self.presenter
            .as_ref()
            .is_some_and(PresenterRegistration::is_active)
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop watching, save any dirty state, and wait for the worker to exit.
    pub async fn shutdown(mut self) -> Result<SaveOutcome, SyncError> {
        // Stop reacting to external changes before the final save.
        drop(self.presenter.take());

        let (reply, outcome) = oneshot::channel();
        let sent = self.queue.send(QueueCommand::Shutdown(reply)).is_ok();
        let outcome = if sent { outcome.await.ok() } else { None };

        let path = self.state.file_path().to_path_buf();
        let Self { queue, worker, .. } = self;
        drop(queue);
        worker
            .await
            .map_err(|e| SyncError::WorkerPanicked(e.to_string()))?;

        info!(path = %path.display(), "sync account shut down");
        outcome.ok_or(SyncError::QueueClosed { path })
    }

    fn submit(&self, command: QueueCommand) -> Result<(), SyncError> {
        self.queue.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> SyncError {
        SyncError::QueueClosed {
            path: self.state.file_path().to_path_buf(),
        }
    }
}

impl<M: SubscriptionModel + 'static> std::fmt::Debug for SyncAccount<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAccount")
            .field("file_path", &self.state.file_path())
            .field("dirty", &self.state.is_dirty())
            .field("loading", &self.state.is_loading())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl SyncAccount<SubscriptionList> {
    /// Open an account for `config` with a fresh [`SubscriptionList`] and the
    /// lock-file coordinator.
    pub fn open(config: &SyncConfig) -> anyhow::Result<Self> {
        Self::open_with(config, Arc::new(LockFileCoordinator::new()))
    }

    /// Like [`SyncAccount::open`] with a caller-supplied coordinator.
    pub fn open_with(
        config: &SyncConfig,
        coordinator: Arc<dyn FileCoordinator>,
    ) -> anyhow::Result<Self> {
        let batch = Arc::new(BatchUpdate::new());
        let list = SubscriptionList::new(config.file.display_name.clone(), Arc::clone(&batch));
        let model = Arc::new(Mutex::new(list));

        let account = Self::start(config, Arc::clone(&model), batch, coordinator)
            .with_context(|| format!("failed to open account for {}", config.file.path.display()))?;
        model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_dirty_observer(account.dirty_observer());
        Ok(account)
    }

    /// The batch scope whose notices announce model updates.
    pub fn batch(&self) -> Arc<BatchUpdate> {
        Arc::clone(
            self.model
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .batch(),
        )
    }
}

/// Route external-change notifications onto the account's queue as reloads.
fn register_presenter(
    coordinator: &dyn FileCoordinator,
    path: &Path,
    queue: &mpsc::UnboundedSender<QueueCommand>,
) -> Option<PresenterRegistration> {
    let queue = queue.downgrade();
    let callback: ChangeCallback = Box::new(move || match queue.upgrade() {
        Some(tx) => {
            if tx.send(QueueCommand::Reload(None)).is_err() {
                trace!("sync queue closed; dropping external change");
            }
        }
        None => trace!("sync account gone; dropping external change"),
    });

    match coordinator.on_external_change(path, callback) {
        Ok(registration) => Some(registration),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "external changes will not be detected");
            None
        }
    }
}
