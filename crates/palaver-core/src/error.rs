//! Error types module
//!
//! All fatal errors are unified under the `AppError` enum: database,
//! filesystem, image-processing, and capability errors. Per-file validation
//! failures are deliberately *not* represented here; they are collected as
//! structured `UploadError` values on the pending file so one bad file never
//! aborts its batch (see `models::pending`).

use sqlx::Error as SqlxError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot create directory: {0}")]
    DirectoryNotCreatable(String),

    #[error("Cannot write to directory: {0}")]
    DirectoryNotWritable(String),

    #[error("Path escapes allowed attachment roots: {0}")]
    RestrictedRoot(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// True for configuration/capability failures that must abort a whole
    /// upload batch before any per-file validation runs.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            AppError::DirectoryNotCreatable(_)
                | AppError::DirectoryNotWritable(_)
                | AppError::RestrictedRoot(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_are_flagged() {
        assert!(AppError::RestrictedRoot("/etc".into()).is_capability());
        assert!(AppError::DirectoryNotCreatable("x".into()).is_capability());
        assert!(!AppError::Internal("x".into()).is_capability());
    }

    #[test]
    fn anyhow_conversion_keeps_message() {
        let err: AppError = anyhow::anyhow!("boom").into();
        match err {
            AppError::InternalWithSource { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
