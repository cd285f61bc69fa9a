//! Error types for the opmlsync libraries.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the opmlsync libraries.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Opml(#[from] OpmlError),

    #[error(transparent)]
    FileAccess(#[from] FileAccessError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// OPML codec errors
// ---------------------------------------------------------------------------

/// Errors from parsing an OPML document.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// The bytes are not valid UTF-8.
    #[error("OPML document is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    /// The document has no `<opml>` root element.
    #[error("missing <opml> root element")]
    MissingRoot,

    /// The document has no `<body>` element.
    #[error("missing <body> element")]
    MissingBody,

    /// A tag was opened but never terminated with `>`.
    #[error("unterminated tag at byte {offset}")]
    UnterminatedTag { offset: usize },

    /// A closing tag did not match the element that was open.
    #[error("mismatched closing tag </{found}> at byte {offset} (expected </{expected}>)")]
    MismatchedTag {
        expected: String,
        found: String,
        offset: usize,
    },

    /// The document ended while elements were still open.
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),

    /// An attribute could not be parsed.
    #[error("malformed attribute in <{tag}> at byte {offset}")]
    MalformedAttribute { tag: String, offset: usize },
}

// ---------------------------------------------------------------------------
// Coordinated file access errors
// ---------------------------------------------------------------------------

/// Errors from coordinated reads and writes of the OPML file.
#[derive(Debug, Error)]
pub enum FileAccessError {
    /// The file does not exist (benign on first load).
    #[error("file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// The advisory lock could not be acquired or released.
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileAccessError {
    /// Wrap an I/O error, mapping `NotFound` to the dedicated variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lock {
            path: path.into(),
            source,
        }
    }

    /// Whether this is the "no document yet" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The path the failed operation targeted.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound { path } | Self::Lock { path, .. } | Self::Io { path, .. } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// Change-notification errors
// ---------------------------------------------------------------------------

/// Errors from registering for external-change notifications.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The file-watch backend could not be created.
    #[error("watch backend error: {0}")]
    Backend(String),

    /// The path could not be registered with the backend.
    #[error("failed to watch {}: {detail}", .path.display())]
    Register { path: PathBuf, detail: String },

    /// The watched path has no parent directory to observe.
    #[error("path has no parent directory: {}", .0.display())]
    NoParent(PathBuf),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The global tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// Errors from direct edits to the subscription list.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The named folder does not exist.
    #[error("folder not found: {0}")]
    FolderNotFound(String),

    /// A feed with this URL is already present in the target container.
    #[error("feed already present: {0}")]
    DuplicateFeed(String),

    /// The model has been deleted and no longer accepts edits.
    #[error("subscription list has been deleted")]
    Deleted,
}

// ---------------------------------------------------------------------------
// Sync queue errors
// ---------------------------------------------------------------------------

/// Errors from submitting work to an account's serial sync queue.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The queue worker has stopped and no longer accepts commands.
    #[error("sync queue for {} is closed", .path.display())]
    QueueClosed { path: PathBuf },

    /// The queue worker panicked while shutting down.
    #[error("sync worker panicked: {0}")]
    WorkerPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = OpmlError::MismatchedTag {
            expected: "body".into(),
            found: "head".into(),
            offset: 12,
        };
        assert_eq!(
            err.to_string(),
            "mismatched closing tag </head> at byte 12 (expected </body>)"
        );

        let err = FileAccessError::NotFound {
            path: PathBuf::from("/tmp/subs.opml"),
        };
        assert_eq!(err.to_string(), "file not found: /tmp/subs.opml");

        let err = ConfigError::InvalidValue {
            field: "save.debounce_ms".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("save.debounce_ms"));
    }

    #[test]
    fn test_io_maps_not_found() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = FileAccessError::io("/tmp/missing.opml", source);
        assert!(err.is_not_found());
        assert_eq!(err.path(), std::path::Path::new("/tmp/missing.opml"));

        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = FileAccessError::io("/tmp/locked.opml", source);
        assert!(matches!(err, FileAccessError::Io { .. }));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = OpmlError::MissingRoot.into();
        assert!(matches!(core_err, CoreError::Opml(_)));

        let core_err: CoreError = ModelError::Deleted.into();
        assert!(matches!(core_err, CoreError::Model(_)));

        let core_err: CoreError = SyncError::QueueClosed {
            path: PathBuf::from("/tmp/subs.opml"),
        }
        .into();
        assert_eq!(core_err.to_string(), "sync queue for /tmp/subs.opml is closed");
    }
}
