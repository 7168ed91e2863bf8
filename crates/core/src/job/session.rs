//! Session id persistence across restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse session file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: u64,
    pub session_start: DateTime<Utc>,
}

/// File holding the last session id handed out.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last recorded session, if the file exists.
    pub fn read(&self) -> Result<Option<SessionRecord>, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| SessionError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    /// Increment the stored session id, stamp the start time and return the new id.
    /// A missing file starts numbering at 1.
    pub fn advance(&self) -> Result<u64, SessionError> {
        let next = self.read()?.map(|r| r.session_id + 1).unwrap_or(1);
        let record = SessionRecord {
            session_id: next,
            session_start: Utc::now(),
        };
        let content = toml::to_string(&record).map_err(|e| SessionError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, content).map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(session_id = next, path = ?self.path, "Advanced session id");
        Ok(next)
    }
}
