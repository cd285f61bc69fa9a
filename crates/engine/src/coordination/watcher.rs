//! External-change presenter backed by `notify`.
//!
//! Editors and sync tools usually replace a file by renaming a temp file over
//! it, which drops a watch placed on the file itself. The watch is therefore
//! placed on the parent directory and events are filtered by file name.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use opmlsync_core::errors::WatchError;

use super::{ChangeCallback, PresenterRegistration};

/// Start watching `path`; `callback` fires for every relevant change until
/// the returned registration is dropped.
pub fn watch_file(
    path: &Path,
    callback: ChangeCallback,
) -> Result<PresenterRegistration, WatchError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?;
    let target = path
        .file_name()
        .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?
        .to_os_string();

    fs::create_dir_all(dir).map_err(|e| WatchError::Register {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    let watched = path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        match event {
            Ok(event) => {
                if is_relevant(&event, &target) {
                    debug!(path = %watched.display(), kind = ?event.kind, "external change detected");
                    callback();
                }
            }
            Err(e) => warn!(path = %watched.display(), error = %e, "watch backend error"),
        }
    })
    .map_err(|e| WatchError::Backend(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| WatchError::Register {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;

    info!(path = %path.display(), "watching for external changes");
    Ok(PresenterRegistration::new(path, watcher))
}

/// True when `event` may have changed the file named `target`.
fn is_relevant(event: &Event, target: &OsStr) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use notify::event::{AccessKind, CreateKind, ModifyKind, RenameMode};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_modify_of_target_is_relevant() {
        let e = event(
            EventKind::Modify(ModifyKind::Any),
            &["/data/Subscriptions.opml"],
        );
        assert!(is_relevant(&e, OsStr::new("Subscriptions.opml")));
    }

    #[test]
    fn test_rename_onto_target_is_relevant() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/data/.Subscriptions.opml.abc123.tmp", "/data/Subscriptions.opml"],
        );
        assert!(is_relevant(&e, OsStr::new("Subscriptions.opml")));
    }

    #[test]
    fn test_sibling_files_are_ignored() {
        let lock = event(
            EventKind::Create(CreateKind::File),
            &["/data/.Subscriptions.opml.lock"],
        );
        assert!(!is_relevant(&lock, OsStr::new("Subscriptions.opml")));

        let other = event(EventKind::Modify(ModifyKind::Any), &["/data/other.opml"]);
        assert!(!is_relevant(&other, OsStr::new("Subscriptions.opml")));
    }

    #[test]
    fn test_access_events_are_ignored() {
        let e = event(
            EventKind::Access(AccessKind::Any),
            &["/data/Subscriptions.opml"],
        );
        assert!(!is_relevant(&e, OsStr::new("Subscriptions.opml")));
    }

    #[test]
    fn test_bare_file_name_has_no_parent() {
        let result = watch_file(Path::new("subs.opml"), Box::new(|| {}));
        assert!(matches!(result, Err(WatchError::NoParent(_))));
    }

    #[test]
    fn test_registration_is_active_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.opml");
        let registration = watch_file(&path, Box::new(|| {})).unwrap();
        assert!(registration.is_active());
        assert_eq!(registration.path(), path.as_path());
    }
}
