//! Transfer executor: one outbound upload per call, no internal retries.

mod http;

pub use http::{HttpTransfer, download_url};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use thiserror::Error;

use crate::jobs::FilePayload;

/// Receives upload percentages in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Success body of `POST /api/upload`. Only `id` is read; other fields are
/// ignored whatever their type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
}

/// Server ids may arrive as JSON strings or numbers.
fn id_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Uint(u64),
    }
    Ok(match RawId::deserialize(de)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::Uint(n) => n.to_string(),
    })
}

/// Why a single upload attempt failed. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Connection refused/reset, DNS, broken body stream.
    #[error("Network error: {0}")]
    Network(String),
    /// The request exceeded the client deadline.
    #[error("Upload timeout")]
    Timeout,
    /// Non-2xx response; `message` comes from the body's `error` field when present.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// 2xx response whose body is not an upload receipt.
    #[error("Invalid response format")]
    MalformedResponse,
    /// The local file could not be opened or read.
    #[error("Cannot read file: {0}")]
    Read(String),
}

/// Performs a single upload attempt.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Upload `payload`, calling `progress` as bytes leave, and return the
    /// server receipt or the failure.
    async fn upload(
        &self,
        payload: &FilePayload,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, TransferError>;
}

/// Rounded percentage of `sent` over `total`; an empty body counts as done.
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let sent = sent.min(total) as u128;
    let total = total as u128;
    ((sent * 100 + total / 2) / total) as u8
}
