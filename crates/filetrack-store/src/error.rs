//! Store error type

use std::fmt;
use std::path::PathBuf;

/// Failure talking to the document store.
///
/// `RevisionConflict` is not a failure of the store itself: it tells the
/// caller that someone else wrote the document since it was read.
#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serde {
        path: PathBuf,
        source: serde_json::Error,
    },
    RevisionConflict {
        collection: &'static str,
        key: String,
        expected: u64,
        found: u64,
    },
    AlreadyExists {
        collection: &'static str,
        key: String,
    },
    NotFound {
        collection: &'static str,
        key: String,
    },
    InvalidKey(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "IO error at {}: {source}", path.display()),
            Self::Serde { path, source } => {
                write!(f, "corrupt document {}: {source}", path.display())
            }
            Self::RevisionConflict {
                collection,
                key,
                expected,
                found,
            } => write!(
                f,
                "{collection}/{key}: revision conflict (expected {expected}, found {found})"
            ),
            Self::AlreadyExists { collection, key } => write!(f, "{collection}/{key} already exists"),
            Self::NotFound { collection, key } => write!(f, "{collection}/{key} not found"),
            Self::InvalidKey(key) => write!(f, "invalid document key: {key:?}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serde { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::RevisionConflict { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serde {
            path: path.into(),
            source,
        }
    }
}
