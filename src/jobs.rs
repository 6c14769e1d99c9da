//! Upload jobs and the file payloads they carry.

use chrono::{DateTime, Local};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use uuid::Uuid;

use crate::config::LimitsCfg;

/// Stable handle for a queued job.
pub type JobId = Uuid;

/// Lifecycle state of an upload job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Waiting for a free upload slot.
    Queued,
    /// Handed to the transfer executor.
    Uploading,
    /// Accepted by the server.
    Completed,
    /// Last attempt failed.
    Failed,
    /// Waiting out the backoff delay before re-entering the queue.
    Retrying,
}

impl JobStatus {
    /// Short label for tables and logs.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Uploading => "Uploading",
            JobStatus::Completed => "Done",
            JobStatus::Failed => "Failed",
            JobStatus::Retrying => "Retrying",
        }
    }
}

/// A local file to upload, as validated by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePayload {
    /// Location on disk; read lazily by the executor.
    pub path: PathBuf,
    /// File name sent in the multipart part.
    pub name: String,
    /// Size in bytes at admission time.
    pub size: u64,
    /// MIME type derived from the extension.
    pub content_type: String,
}

/// Why a path was not accepted into the queue.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("{name} is too large ({size} > {max} bytes)")]
    TooLarge { name: String, size: u64, max: u64 },
    #[error("{name}: file type {content_type} is not allowed")]
    TypeNotAllowed { name: String, content_type: String },
}

impl FilePayload {
    /// Stat a file and check it against the configured size/type limits.
    pub async fn from_path(path: &Path, limits: &LimitsCfg) -> Result<Self, PayloadError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| PayloadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(PayloadError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let size = meta.len();
        if size > limits.max_file_size {
            return Err(PayloadError::TooLarge {
                name,
                size,
                max: limits.max_file_size,
            });
        }

        let content_type = content_type_for(path).to_string();
        if !limits.allowed_types.is_empty()
            && !limits.allowed_types.iter().any(|t| t == &content_type)
        {
            return Err(PayloadError::TypeNotAllowed { name, content_type });
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size,
            content_type,
        })
    }
}

/// Expand a path into payloads: a file yields itself, a directory yields
/// every regular file directly inside it (sorted by name).
pub async fn collect_payloads(
    path: &Path,
    limits: &LimitsCfg,
) -> (Vec<FilePayload>, Vec<PayloadError>) {
    let mut accepted = vec![];
    let mut rejected = vec![];

    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        match FilePayload::from_path(path, limits).await {
            Ok(p) => accepted.push(p),
            Err(e) => rejected.push(e),
        }
        return (accepted, rejected);
    }

    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(rd) => rd,
        Err(source) => {
            rejected.push(PayloadError::Io {
                path: path.to_path_buf(),
                source,
            });
            return (accepted, rejected);
        }
    };
    let mut files = vec![];
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    files.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(source) => {
                rejected.push(PayloadError::Io {
                    path: path.to_path_buf(),
                    source,
                });
                break;
            }
        }
    }
    files.sort();

    for file in files {
        match FilePayload::from_path(&file, limits).await {
            Ok(p) => accepted.push(p),
            Err(e) => rejected.push(e),
        }
    }
    (accepted, rejected)
}

/// MIME type for a file, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Human-readable size, e.g. `0 Bytes`, `1.5 KB`, `10 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut s = format!("{value:.1}");
    if s.ends_with(".0") {
        s.truncate(s.len() - 2);
    }
    format!("{s} {}", UNITS[unit])
}

/// One file tracked by the upload queue.
#[derive(Clone, Debug)]
pub struct Job {
    /// Stable id used for retry/remove.
    pub id: JobId,
    /// Shared with the executor while the upload runs.
    pub payload: Arc<FilePayload>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Percent of the current attempt, 0..=100.
    pub progress: u8,
    /// Retry attempts already consumed.
    pub retry_count: u32,
    /// Failure reason while `Failed`.
    pub error: Option<String>,
    /// Server-side id once `Completed`.
    pub result_id: Option<String>,
    /// When the job was admitted.
    pub added_at: DateTime<Local>,
}

impl Job {
    /// New job in the `Queued` state with a fresh id.
    pub fn new(payload: Arc<FilePayload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Queued,
            progress: 0,
            retry_count: 0,
            error: None,
            result_id: None,
            added_at: Local::now(),
        }
    }

    /// Display name of the payload.
    pub fn name(&self) -> &str {
        &self.payload.name
    }
}
