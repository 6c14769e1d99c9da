//! Multipart upload over reqwest with streamed progress.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{
    Body, Client, StatusCode,
    multipart::{Form, Part},
};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{ProgressFn, Transfer, TransferError, UploadReceipt, percent};
use crate::jobs::FilePayload;

/// Error body returned by the upload API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Uploads to `{base_url}/api/upload` with a fixed request deadline.
#[derive(Clone, Debug)]
pub struct HttpTransfer {
    http: Client,
    base_url: String,
}

impl HttpTransfer {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/api/upload", self.base_url)
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn upload(
        &self,
        payload: &FilePayload,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, TransferError> {
        let file = tokio::fs::File::open(&payload.path)
            .await
            .map_err(|e| TransferError::Read(e.to_string()))?;

        // Count bytes as reqwest pulls them off the stream.
        let total = payload.size;
        let mut sent = 0u64;
        let mut last = None;
        let stream = ReaderStream::new(file).map(move |chunk| {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            let pct = percent(sent, total);
            if last != Some(pct) {
                last = Some(pct);
                progress(pct);
            }
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(payload.name.clone())
            .mime_str(&payload.content_type)
            .map_err(|e| TransferError::Read(format!("bad content type: {e}")))?;
        let form = Form::new().part("file", part);

        tracing::debug!("POST {} ({} bytes)", self.upload_url(), total);
        let resp = self
            .http
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(classify)?;
        if status.is_success() {
            serde_json::from_slice::<UploadReceipt>(&body)
                .map_err(|_| TransferError::MalformedResponse)
        } else {
            Err(TransferError::Http {
                status: status.as_u16(),
                message: error_message(status, &body),
            })
        }
    }
}

/// Map a reqwest failure onto the transfer taxonomy.
fn classify(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::Timeout
    } else {
        TransferError::Network(e.to_string())
    }
}

/// Message for a non-2xx response: the JSON `error` field, else `HTTP {status}`.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Link where a completed upload can be downloaded.
pub fn download_url(base_url: &str, result_id: &str) -> String {
    format!(
        "{}/api/files/{}/download",
        base_url.trim_end_matches('/'),
        urlencoding::encode(result_id)
    )
}
