//! Shared key-value scoreboard backing the coordinator's ledgers.

mod memory;
mod sqlite;
mod store;

pub use memory::MemoryScoreboard;
pub use sqlite::SqliteScoreboard;
pub use store::{Scoreboard, ScoreboardError};
