//! opmlsync core library.
//!
//! The collaborators the sync engine works against: the OPML document codec,
//! the subscription-list model and its change-notification batching, plus the
//! shared error taxonomy, configuration, and logging setup.

pub mod batch;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod opml;
pub mod subscriptions;

// Re-exports for convenience.
pub use batch::{BatchScope, BatchUpdate, UpdateNotice};
pub use config::SyncConfig;
pub use errors::CoreError;
pub use models::{Feed, Folder, Item};
pub use subscriptions::{DirtyObserver, SubscriptionList, SubscriptionModel};
