use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use thiserror::Error;

/// Component-level failure. Never crosses the bus as a return value; it is
/// turned into an `error` event with [`SessionError::to_event_data`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Pty(#[from] pty_manager::PtyError),
    #[error("no terminal instance {0}")]
    UnknownTerminal(u32),
    #[error("git: {0}")]
    Git(String),
    #[error("{path}: invalid hex contents: {source}")]
    Hex {
        path: PathBuf,
        #[source]
        source: hex::FromHexError,
    },
}

impl SessionError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            SessionError::Io { path, .. } | SessionError::Hex { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Payload of the `error` event.
    pub fn to_event_data(&self) -> Value {
        match self.path() {
            Some(path) => json!({ "message": self.to_string(), "path": path }),
            None => json!({ "message": self.to_string() }),
        }
    }
}
