//! Backlog of failed transfer units.

mod ledger;
mod policy;
mod types;

pub use ledger::BacklogLedger;
pub use policy::{policy_by_name, BacklogPolicy, FifoPolicy, PriorityPolicy};
pub use types::{
    BacklogContext, BacklogEntry, BacklogError, BacklogReason, BacklogStats, ResultCode,
};
