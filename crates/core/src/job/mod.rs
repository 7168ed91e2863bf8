//! Job lifecycle bookkeeping.

mod ledger;
mod session;
mod types;

pub use ledger::{JobLedger, VisitInfo};
pub use session::{SessionError, SessionFile, SessionRecord};
pub use types::{CreateJobRequest, Job, JobError, JobState};
