pub mod client;
pub mod error;
pub mod types;

pub use client::{JobClient, OpenAiClient};
pub use error::ApiError;
pub use types::Batch;
