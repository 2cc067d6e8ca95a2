//! Repositories for the metadata store.
//!
//! One repository per concern, each a cheap `Clone` over the shared pool.

pub mod attachments;
pub mod audit;
pub mod directories;
pub mod tasks;

pub use attachments::AttachmentRepository;
pub use audit::{AuditLogRepository, AuditSink};
pub use directories::DirectoryRepository;
pub use tasks::TaskRepository;
