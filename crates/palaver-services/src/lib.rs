//! Palaver services
//!
//! The five operations of the attachment store: upload intake, commit,
//! batch read, filtered removal, and the resumable integrity sweep. Each
//! service is stateless between invocations; session-scoped state
//! (`PendingBatch`, `RepairProgress`) is owned by the caller and passed in
//! by value, matching the host's one-bounded-invocation-per-request model.

pub mod intake;
pub mod reader;
pub mod remover;
pub mod scanner;
pub mod store;

pub use intake::UploadIntake;
pub use reader::{AllowAll, AttachmentDisplay, AttachmentReader, ThumbInfo, VisibilityGate};
pub use remover::AttachmentRemover;
pub use scanner::IntegrityScanner;
pub use store::AttachmentStore;
