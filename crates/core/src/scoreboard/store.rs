//! Scoreboard storage trait and error type.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors raised by scoreboard backends.
#[derive(Debug, Error)]
pub enum ScoreboardError {
    /// The backend could not be reached or the query failed.
    #[error("scoreboard backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("corrupt scoreboard value at {key}/{field}: {message}")]
    Corrupt {
        key: String,
        field: String,
        message: String,
    },

    /// The key holds a different kind of value (hash vs list).
    #[error("wrong value type for key {0}")]
    WrongType(String),
}

impl ScoreboardError {
    pub(crate) fn corrupt(key: &str, field: &str, message: impl ToString) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Hash/list key-value store shared by the coordinator's ledgers.
///
/// Implementations must make each single call atomic for its key. No call spans
/// more than one key, and callers never rely on cross-key transactions.
pub trait Scoreboard: Send + Sync {
    /// Read one field of a hash.
    fn get(&self, key: &str, field: &str) -> Result<Option<String>, ScoreboardError>;

    /// Write one field of a hash, creating the hash if needed.
    fn set(&self, key: &str, field: &str, value: &str) -> Result<(), ScoreboardError>;

    /// Read every field of a hash. Missing keys yield an empty map.
    fn get_all(&self, key: &str) -> Result<BTreeMap<String, String>, ScoreboardError>;

    /// Atomically add `delta` to an integer field (missing fields count as 0) and
    /// return the new value.
    fn incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, ScoreboardError>;

    /// Remove a key of any type. Returns true if it existed.
    fn delete(&self, key: &str) -> Result<bool, ScoreboardError>;

    /// Append a value to the tail of a list and return the new length.
    fn list_push(&self, key: &str, value: &str) -> Result<usize, ScoreboardError>;

    /// Read an inclusive range of a list. Negative indices count from the tail,
    /// so `list_range(key, 0, -1)` returns the whole list.
    fn list_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, ScoreboardError>;

    /// Remove every occurrence of `value` from a list and return how many were removed.
    fn list_remove(&self, key: &str, value: &str) -> Result<usize, ScoreboardError>;
}

/// Resolve redis-style inclusive range bounds against a list length.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
