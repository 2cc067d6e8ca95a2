//! Palaver database layer
//!
//! sqlx repositories over the embedded SQLite metadata store: attachments,
//! directory registry, approval queue, background tasks, and the append-only
//! audit log. Queries are runtime-checked; the schema is bootstrapped by
//! [`migrate`] with idempotent DDL so the library also embeds cleanly into a
//! host schema that already carries the forum tables.

pub mod db;
pub mod filter;
pub mod schema;

pub use db::{
    AttachmentRepository, AuditLogRepository, AuditSink, DirectoryRepository, TaskRepository,
};
pub use schema::{connect, migrate};
