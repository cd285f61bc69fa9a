//! Per-account serial queue and debounced save scheduling.
//!
//! One [`SaveScheduler`] task runs per account. It receives [`QueueCommand`]s
//! over an unbounded channel and executes them strictly one at a time, so a
//! load, a reload and a save of the same file never overlap. It also owns the
//! single pending-save deadline: the first `ScheduleSave` of a dirty period
//! arms it and later ones are coalesced into the same write.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use opmlsync_core::subscriptions::SubscriptionModel;

use crate::controller::{LoadOutcome, SaveOutcome, SyncController};

/// Work submitted to an account's serial queue.
#[derive(Debug)]
pub enum QueueCommand {
    /// Initial load; the outcome is sent back when a reply channel is given.
    Load(Option<oneshot::Sender<LoadOutcome>>),
    /// Re-read after an external change.
    Reload(Option<oneshot::Sender<LoadOutcome>>),
    /// The model became dirty; save after the debounce interval.
    ScheduleSave,
    /// Save now if dirty, cancelling the pending deadline.
    Flush(oneshot::Sender<SaveOutcome>),
    /// Reply once every earlier command has run.
    Settle(oneshot::Sender<()>),
    /// Save if dirty, reply, and stop the worker.
    Shutdown(oneshot::Sender<SaveOutcome>),
}

/// The account's single worker.
pub struct SaveScheduler<M: SubscriptionModel> {
    controller: SyncController<M>,
    rx: mpsc::UnboundedReceiver<QueueCommand>,
    debounce: Duration,
    pending_save: Option<Instant>,
}

impl<M: SubscriptionModel> SaveScheduler<M> {
    pub fn new(
        controller: SyncController<M>,
        rx: mpsc::UnboundedReceiver<QueueCommand>,
        debounce: Duration,
    ) -> Self {
        Self {
            controller,
            rx,
            debounce,
            pending_save: None,
        }
    }

    /// Main worker loop.
    ///
    /// Runs until a `Shutdown` command arrives or every sender is dropped;
    /// either way dirty state is flushed before returning.
    pub async fn run(mut self) {
        let path = self.controller.state().file_path().to_path_buf();
        info!(
            path = %path.display(),
            debounce_ms = self.debounce.as_millis() as u64,
            "sync queue started"
        );

        loop {
            let deadline = self.pending_save;
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => {
                        if self.handle(command).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!(path = %path.display(), "all queue handles dropped");
                        self.finish().await;
                        break;
                    }
                },
                // Debounce deadline reached
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.pending_save = None;
                    self.controller.save_if_needed().await;
                }
            }
        }

        info!(path = %path.display(), "sync queue stopped");
    }

    /// Run one command; `Break` stops the worker.
    async fn handle(&mut self, command: QueueCommand) -> ControlFlow<()> {
        match command {
            QueueCommand::Load(reply) => {
                let outcome = self.controller.load().await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            QueueCommand::Reload(reply) => {
                let outcome = self.controller.reload().await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            QueueCommand::ScheduleSave => self.schedule_save(),
            QueueCommand::Flush(reply) => {
                self.pending_save = None;
                let outcome = self.controller.save_if_needed().await;
                let _ = reply.send(outcome);
            }
            QueueCommand::Settle(reply) => {
                let _ = reply.send(());
            }
            QueueCommand::Shutdown(reply) => {
                let outcome = self.finish().await;
                let _ = reply.send(outcome);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn schedule_save(&mut self) {
        if self.pending_save.is_some() {
            trace!("save already scheduled; coalescing");
            return;
        }
        let deadline = Instant::now() + self.debounce;
        self.pending_save = Some(deadline);
        debug!(
            path = %self.controller.state().file_path().display(),
            debounce_ms = self.debounce.as_millis() as u64,
            "save scheduled"
        );
    }

    async fn finish(&mut self) -> SaveOutcome {
        self.pending_save = None;
        self.controller.save_if_needed().await
    }
}
