mod backoff;
mod job;
mod state;

pub use backoff::PollBackoff;
pub use job::{DroppedUnit, FailureReason, InputUnit, JobOutcome, JobStatus, RemoteJob};
pub use state::{Stage, UnitTracker};
