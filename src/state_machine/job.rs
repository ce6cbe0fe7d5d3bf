use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::Stage;
use crate::openai::Batch;

/// Lower-case a remote status and replace spaces with underscores.
///
/// Applying it twice gives the same result as applying it once.
pub fn normalize_status(raw: &str) -> String {
    raw.to_lowercase().replace(' ', "_")
}

/// Normalized lifecycle status of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    /// Map a raw remote status onto the normalized enum.
    ///
    /// `validating` counts as queued; `finalizing` and `cancelling` are still
    /// in progress. Anything unrecognized is treated as non-terminal so the
    /// poll loop keeps going.
    pub fn from_remote(raw: &str) -> Self {
        match normalize_status(raw).as_str() {
            "queued" | "validating" => JobStatus::Queued,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "expired" => JobStatus::Expired,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            "in_progress" | "finalizing" | "cancelling" => JobStatus::InProgress,
            other => {
                tracing::debug!(status = other, "unrecognized remote status, treating as in progress");
                JobStatus::InProgress
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payload file to submit. Identity is its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputUnit {
    path: PathBuf,
}

impl InputUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name sent with the upload.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}

impl fmt::Display for InputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Local view of a job accepted by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub id: String,
    pub status: JobStatus,
    pub input_ref: String,
    pub output_ref: Option<String>,
}

impl From<&Batch> for RemoteJob {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id.clone(),
            status: JobStatus::from_remote(&batch.status),
            input_ref: batch.input_file_id.clone(),
            output_ref: batch.output_file_id.clone(),
        }
    }
}

/// Why a unit did not produce results. Each variant renders a distinct message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("could not read input file: {0}")]
    ReadInput(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("job creation failed: {0}")]
    CreateJob(String),

    #[error("status check failed: {0}")]
    Poll(String),

    #[error("job ended remotely with status {0}")]
    RemoteStatus(JobStatus),

    #[error("job completed but the service reported no output file")]
    MissingOutput,

    #[error("result download failed: {0}")]
    Download(String),

    #[error("could not write results to {path}: {message}")]
    WriteOutput { path: PathBuf, message: String },

    #[error("pipeline task panicked: {0}")]
    Panicked(String),
}

impl FailureReason {
    /// True when the failure happened on this machine rather than at the service.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            FailureReason::ReadInput(_)
                | FailureReason::WriteOutput { .. }
                | FailureReason::Panicked(_)
        )
    }
}

/// Final record for a unit that reached job creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub succeeded: bool,
    pub output_location: Option<PathBuf>,
    pub failure: Option<FailureReason>,
}

impl JobOutcome {
    pub fn success(job_id: impl Into<String>, output_location: PathBuf) -> Self {
        Self {
            job_id: job_id.into(),
            succeeded: true,
            output_location: Some(output_location),
            failure: None,
        }
    }

    pub fn failure(job_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            job_id: job_id.into(),
            succeeded: false,
            output_location: None,
            failure: Some(reason),
        }
    }
}

/// A unit that never got a remote job (upload or creation failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedUnit {
    pub input: PathBuf,
    /// Stage the unit was in when it failed.
    pub stage: Stage,
    pub reason: FailureReason,
}
