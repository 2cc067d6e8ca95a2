//! Domain models for the attachment store.

pub mod attachment;
pub mod directory;
pub mod pending;
pub mod removal;
pub mod repair;
pub mod task;

pub use attachment::{Attachment, AttachmentKind, NewAttachment};
pub use directory::{DirUsage, DirectoryEntry};
pub use pending::{IncomingFile, PendingBatch, PendingUpload, UploadError, UploadErrorCode};
pub use removal::{AuditAction, RemovalFilter};
pub use repair::{
    RepairCounts, RepairIssue, RepairPhase, RepairProgress, RepairSummary, ScanOutcome,
};
pub use task::TaskType;
