//! Coordinated access to the subscription file.
//!
//! [`FileCoordinator`] is the seam between the engine and the platform:
//! mutually exclusive reads and writes of one path, plus a registration for
//! "another process changed this file" notifications. [`LockFileCoordinator`]
//! implements it with an advisory lock file, atomic rename-on-write, and a
//! `notify` watcher.

pub mod lock_file;
pub mod watcher;

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use opmlsync_core::errors::{FileAccessError, WatchError};

pub use lock_file::LockFileCoordinator;

/// Invoked (from any thread) when the watched file changed externally.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Mutually exclusive, presence-announced access to a file path.
pub trait FileCoordinator: Send + Sync {
    /// Read the whole file while holding a shared lock.
    fn locked_read(&self, path: &Path) -> Result<Vec<u8>, FileAccessError>;

    /// Replace the whole file while holding an exclusive lock. External
    /// readers observe either the old or the new contents, never a mix.
    fn locked_write(&self, path: &Path, bytes: &[u8]) -> Result<(), FileAccessError>;

    /// Register `callback` for external modifications of `path`. The
    /// registration lasts until the returned guard is dropped.
    fn on_external_change(
        &self,
        path: &Path,
        callback: ChangeCallback,
    ) -> Result<PresenterRegistration, WatchError>;
}

/// Keeps an external-change registration alive; dropping it unregisters.
///
/// The guard is never accessed, only dropped; the mutex makes the
/// registration `Sync` for any `Send` guard.
pub struct PresenterRegistration {
    path: PathBuf,
    guard: Option<Mutex<Box<dyn Any + Send>>>,
}

impl PresenterRegistration {
    pub fn new(path: impl Into<PathBuf>, guard: impl Any + Send) -> Self {
        let guard: Box<dyn Any + Send> = Box::new(guard);
        Self {
            path: path.into(),
            guard: Some(Mutex::new(guard)),
        }
    }

    /// A registration for a coordinator that never reports external changes.
    pub fn inactive(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for PresenterRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenterRegistration")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for PresenterRegistration {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            debug!(path = %self.path.display(), "unregistered external-change presenter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_registration_is_send_and_sync() {
        assert_send_sync::<PresenterRegistration>();
    }

    #[test]
    fn test_inactive_registration() {
        let registration = PresenterRegistration::inactive("/tmp/subs.opml");
        assert!(!registration.is_active());
        assert_eq!(registration.path(), Path::new("/tmp/subs.opml"));

        let registration = PresenterRegistration::new("/tmp/subs.opml", 42_u32);
        assert!(registration.is_active());
    }
}
