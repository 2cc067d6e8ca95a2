//! Schema bootstrap.
//!
//! `messages` and `members` belong to the embedding forum; minimal
//! projections are created here (IF NOT EXISTS) so the store is
//! self-contained under test and a no-op against a real host schema.

use palaver_core::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL DEFAULT 1,
        message_id INTEGER,
        member_id INTEGER,
        filename TEXT NOT NULL,
        content_hash TEXT NOT NULL DEFAULT '',
        extension TEXT NOT NULL DEFAULT '',
        size_bytes INTEGER NOT NULL DEFAULT 0,
        width INTEGER NOT NULL DEFAULT 0,
        height INTEGER NOT NULL DEFAULT 0,
        mime_type TEXT NOT NULL DEFAULT '',
        kind INTEGER NOT NULL DEFAULT 0,
        thumbnail_id INTEGER,
        approved INTEGER NOT NULL DEFAULT 1,
        downloads INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments (message_id)",
    "CREATE INDEX IF NOT EXISTS idx_attachments_member ON attachments (member_id)",
    "CREATE INDEX IF NOT EXISTS idx_attachments_thumbnail ON attachments (thumbnail_id)",
    "CREATE TABLE IF NOT EXISTS directories (
        folder_id INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS approval_queue (
        attachment_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS background_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_type TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        claimed_at INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        message_id INTEGER NOT NULL DEFAULT 0,
        filename TEXT NOT NULL,
        logged_at INTEGER NOT NULL
    )",
    // Host projections (see module docs).
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        posted_at INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS members (
        id INTEGER PRIMARY KEY,
        last_login INTEGER NOT NULL DEFAULT 0
    )",
];

/// Open (and create if missing) the SQLite metadata store at `path`.
pub async fn connect(path: &Path) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run the idempotent schema bootstrap.
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = DDL.len(), "schema bootstrap complete");
    Ok(())
}
