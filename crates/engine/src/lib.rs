//! opmlsync engine.
//!
//! Keeps an in-memory subscription list and its OPML file in sync in both
//! directions:
//!
//! - external edit → presenter callback → queued reload → coordinated read →
//!   parse → model update inside one batched-update scope;
//! - model edit → dirty mark → debounced save on the same serial queue →
//!   coordinated atomic write.
//!
//! Hosts normally only touch [`SyncAccount`].

pub mod account;
pub mod controller;
pub mod coordination;
pub mod dirty;
pub mod scheduler;

pub use account::SyncAccount;
pub use controller::{ControllerState, LoadMode, LoadOutcome, SaveOutcome, SyncController, SyncStats};
pub use coordination::{ChangeCallback, FileCoordinator, LockFileCoordinator, PresenterRegistration};
pub use dirty::{DirtyTracker, DirtyTransition, SyncState};
pub use scheduler::{QueueCommand, SaveScheduler};
