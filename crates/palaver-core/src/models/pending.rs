//! Session-scoped upload staging state.
//!
//! `PendingBatch` is owned by the caller and serialized into its session
//! store between requests; the services are stateless. One batch per session
//! key: staging a batch for an unrelated post flushes the previous one.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use uuid::Uuid;

/// A raw upload handed to the intake before staging.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    /// Declared MIME type; the store prefers the sniffed type at commit.
    pub mime: String,
    pub data: Vec<u8>,
}

/// Per-item validation error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorCode {
    ZeroByte,
    UnsafeContent,
    InvalidSvg,
    DirectoryFull,
    TooLarge,
    PostTooLarge,
    TooManyFiles,
    BadExtension,
}

impl Display for UploadErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadErrorCode::ZeroByte => write!(f, "zero_byte_file"),
            UploadErrorCode::UnsafeContent => write!(f, "unsafe_content"),
            UploadErrorCode::InvalidSvg => write!(f, "invalid_svg"),
            UploadErrorCode::DirectoryFull => write!(f, "ran_out_of_space"),
            UploadErrorCode::TooLarge => write!(f, "file_too_large"),
            UploadErrorCode::PostTooLarge => write!(f, "post_total_too_large"),
            UploadErrorCode::TooManyFiles => write!(f, "too_many_files"),
            UploadErrorCode::BadExtension => write!(f, "bad_extension"),
        }
    }
}

/// Structured validation error: machine code plus ordered format arguments,
/// never a bare flag, so callers can render per-file messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadError {
    pub code: UploadErrorCode,
    pub args: Vec<String>,
}

impl UploadError {
    pub fn new(code: UploadErrorCode, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            code,
            args: args.into_iter().collect(),
        }
    }
}

/// One staged, not-yet-committed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpload {
    /// Unguessable identifier for the staged object.
    pub temp_id: Uuid,
    /// Where the raw bytes currently live; None once the temp file was
    /// removed after a failed validation.
    pub temp_path: Option<PathBuf>,
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Folder the object was staged into (may change on quota rollover).
    pub folder_id: i64,
    /// Ordered validation errors; empty means the file is committable.
    pub errors: Vec<UploadError>,
}

impl PendingUpload {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.temp_path.is_some()
    }
}

/// The at-most-one active upload batch for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingBatch {
    /// Logical post key; a stage call with a different key flushes this batch.
    pub session_key: String,
    /// Owning message when editing an existing post.
    pub message_id: Option<i64>,
    pub files: Vec<PendingUpload>,
    /// Running cumulative byte total of valid files in this batch.
    pub total_bytes: u64,
}

impl PendingBatch {
    pub fn valid_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_valid()).count()
    }

    /// Whether a stage request with this key extends the same logical post.
    pub fn is_same_post(&self, session_key: &str, message_id: Option<i64>) -> bool {
        self.session_key == session_key
            || (self.message_id.is_some() && self.message_id == message_id)
    }
}
