//! Timed acknowledgment protocol.

mod registry;
mod types;

pub use registry::{AckRegistry, DEFAULT_ACK_CEILING};
pub use types::{AckError, AckId, AckOutcome, RecordOutcome};
