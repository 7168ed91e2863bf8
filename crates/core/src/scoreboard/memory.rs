//! In-process scoreboard.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::store::{resolve_range, Scoreboard, ScoreboardError};

#[derive(Debug)]
enum Slot {
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

/// Scoreboard kept entirely in memory behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryScoreboard {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, ScoreboardError> {
        self.slots
            .lock()
            .map_err(|e| ScoreboardError::Backend(format!("lock poisoned: {}", e)))
    }
}

impl Scoreboard for MemoryScoreboard {
    fn get(&self, key: &str, field: &str) -> Result<Option<String>, ScoreboardError> {
        let slots = self.lock()?;
        match slots.get(key) {
            None => Ok(None),
            Some(Slot::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(Slot::List(_)) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn set(&self, key: &str, field: &str, value: &str) -> Result<(), ScoreboardError> {
        let mut slots = self.lock()?;
        match slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(BTreeMap::new()))
        {
            Slot::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Slot::List(_) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn get_all(&self, key: &str) -> Result<BTreeMap<String, String>, ScoreboardError> {
        let slots = self.lock()?;
        match slots.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Slot::Hash(hash)) => Ok(hash.clone()),
            Some(Slot::List(_)) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, ScoreboardError> {
        let mut slots = self.lock()?;
        match slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(BTreeMap::new()))
        {
            Slot::Hash(hash) => {
                let current = match hash.get(field) {
                    Some(raw) => raw
                        .parse::<i64>()
                        .map_err(|e| ScoreboardError::corrupt(key, field, e))?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            Slot::List(_) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, ScoreboardError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn list_push(&self, key: &str, value: &str) -> Result<usize, ScoreboardError> {
        let mut slots = self.lock()?;
        match slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::List(Vec::new()))
        {
            Slot::List(list) => {
                list.push(value.to_string());
                Ok(list.len())
            }
            Slot::Hash(_) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, ScoreboardError> {
        let slots = self.lock()?;
        match slots.get(key) {
            None => Ok(Vec::new()),
            Some(Slot::List(list)) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list[from..=to].to_vec(),
                None => Vec::new(),
            }),
            Some(Slot::Hash(_)) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }

    fn list_remove(&self, key: &str, value: &str) -> Result<usize, ScoreboardError> {
        let mut slots = self.lock()?;
        match slots.get_mut(key) {
            None => Ok(0),
            Some(Slot::List(list)) => {
                let before = list.len();
                list.retain(|v| v != value);
                Ok(before - list.len())
            }
            Some(Slot::Hash(_)) => Err(ScoreboardError::WrongType(key.to_string())),
        }
    }
}
