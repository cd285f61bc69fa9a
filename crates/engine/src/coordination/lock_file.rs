//! Advisory-lock coordinator.
//!
//! Readers and writers coordinate through a sidecar lock file
//! (`.<name>.lock`) next to the target: reads hold a shared lock, writes an
//! exclusive one. Writes go to a temp file in the same directory, are synced,
//! then renamed over the target.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, trace};

use opmlsync_core::errors::{FileAccessError, WatchError};

use super::watcher;
use super::{ChangeCallback, FileCoordinator, PresenterRegistration};

/// [`FileCoordinator`] built on `fs2` advisory locks and atomic rename.
#[derive(Debug, Clone, Default)]
pub struct LockFileCoordinator {
    _private: (),
}

impl LockFileCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Path of the sidecar lock file guarding `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".lock");
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn open_lock_file(path: &Path) -> Result<File, FileAccessError> {
    let lock_path = lock_path_for(path);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| match e.kind() {
            // Missing directory: the document cannot exist either.
            std::io::ErrorKind::NotFound => FileAccessError::NotFound {
                path: path.to_path_buf(),
            },
            _ => FileAccessError::io(&lock_path, e),
        })
}

impl FileCoordinator for LockFileCoordinator {
    fn locked_read(&self, path: &Path) -> Result<Vec<u8>, FileAccessError> {
        let lock = open_lock_file(path)?;
        FileExt::lock_shared(&lock)
            .map_err(|e| FileAccessError::lock(path, e))?;
        trace!(path = %path.display(), "acquired shared lock");

        let mut file = File::open(path).map_err(|e| FileAccessError::io(path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| FileAccessError::io(path, e))?;

        // Lock released when `lock` is dropped
        debug!(path = %path.display(), bytes = bytes.len(), "coordinated read complete");
        Ok(bytes)
    }

    fn locked_write(&self, path: &Path, bytes: &[u8]) -> Result<(), FileAccessError> {
        let dir = parent_dir(path);
        fs::create_dir_all(dir).map_err(|e| FileAccessError::io(dir, e))?;

        let lock = open_lock_file(path)?;
        FileExt::lock_exclusive(&lock)
            .map_err(|e| FileAccessError::lock(path, e))?;
        trace!(path = %path.display(), "acquired exclusive lock");

        let mut prefix = OsString::from(".");
        prefix.push(path.file_name().unwrap_or_default());
        prefix.push(".");
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| FileAccessError::io(dir, e))?;

        // Keep the target's permissions; temp files start out private.
        if let Ok(metadata) = fs::metadata(path) {
            temp.as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| FileAccessError::io(temp.path(), e))?;
        }

        temp.write_all(bytes)
            .map_err(|e| FileAccessError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| FileAccessError::io(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| FileAccessError::io(path, e.error))?;

        // Lock released when `lock` is dropped
        debug!(path = %path.display(), bytes = bytes.len(), "coordinated write complete");
        Ok(())
    }

    fn on_external_change(
        &self,
        path: &Path,
        callback: ChangeCallback,
    ) -> Result<PresenterRegistration, WatchError> {
        watcher::watch_file(path, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_is_hidden_sibling() {
        let lock = lock_path_for(Path::new("/data/opml/Subscriptions.opml"));
        assert_eq!(lock, PathBuf::from("/data/opml/.Subscriptions.opml.lock"));
    }

    #[test]
    fn test_parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("subs.opml")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/a/subs.opml")), Path::new("/a"));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.opml");
        let coordinator = LockFileCoordinator::new();

        coordinator.locked_write(&path, b"<opml/>").unwrap();
        assert_eq!(coordinator.locked_read(&path).unwrap(), b"<opml/>");

        coordinator.locked_write(&path, b"<opml></opml>").unwrap();
        assert_eq!(coordinator.locked_read(&path).unwrap(), b"<opml></opml>");
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("subs.opml");
        LockFileCoordinator::new()
            .locked_write(&path, b"data")
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = LockFileCoordinator::new();

        let err = coordinator
            .locked_read(&dir.path().join("absent.opml"))
            .unwrap_err();
        assert!(err.is_not_found());

        let err = coordinator
            .locked_read(&dir.path().join("no-such-dir").join("absent.opml"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
