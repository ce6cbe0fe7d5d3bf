//! Wire types for the `/files` and `/batches` endpoints.
//!
//! Only the fields the tool reads are modelled; everything else in the
//! response bodies is ignored by serde.

use serde::{Deserialize, Serialize};

/// Response of `POST /files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
}

/// Body of `POST /batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub input_file_id: String,
    /// API endpoint every request in the input file targets (e.g. "/v1/chat/completions").
    pub endpoint: String,
    pub completion_window: String,
}

/// A batch as returned by create, retrieve, list and cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    /// Raw remote status. Normalize before comparing.
    pub status: String,
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

/// Per-request tallies inside a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub completed: u64,
    pub failed: u64,
}

/// One page of `GET /batches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchList {
    pub data: Vec<Batch>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub last_id: Option<String>,
}
