//! Shared fixtures for the service integration tests: an isolated SQLite
//! store plus temp directories, and a staged-to-committed upload shortcut.
//!
//! Run from workspace root: `cargo test -p palaver-services`.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use palaver_core::models::{Attachment, IncomingFile, PendingBatch};
use palaver_core::AttachmentConfig;
use palaver_db::{connect, migrate};
use palaver_services::{AttachmentStore, UploadIntake};
use sqlx::SqlitePool;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

/// Opt-in test logging via `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Isolated store: schema-migrated pool plus owned temp directories.
pub struct TestStore {
    pub pool: SqlitePool,
    pub config: Arc<AttachmentConfig>,
    pub _root: TempDir,
}

pub async fn setup() -> TestStore {
    setup_with(|_| {}).await
}

/// Setup with a config tweak applied before any service is constructed.
pub async fn setup_with(customize: impl FnOnce(&mut AttachmentConfig)) -> TestStore {
    init_tracing();
    let root = TempDir::new().unwrap();
    let mut config = AttachmentConfig {
        base_directories: vec![root.path().join("attachments")],
        avatar_directory: root.path().join("avatars"),
        ..AttachmentConfig::default()
    };
    customize(&mut config);

    let pool = connect(&root.path().join("palaver.sqlite")).await.unwrap();
    migrate(&pool).await.unwrap();

    TestStore {
        pool,
        config: Arc::new(config),
        _root: root,
    }
}

/// Solid-color PNG of the given dimensions.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 60, 120, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn incoming(name: &str, mime: &str, data: Vec<u8>) -> IncomingFile {
    IncomingFile {
        name: name.to_string(),
        mime: mime.to_string(),
        data,
    }
}

/// Seed a host message projection row.
pub async fn seed_message(pool: &SqlitePool, id: i64) {
    sqlx::query("INSERT OR IGNORE INTO messages (id, posted_at) VALUES (?, ?)")
        .bind(id)
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await
        .unwrap();
}

/// Seed a host member projection row.
pub async fn seed_member(pool: &SqlitePool, id: i64) {
    sqlx::query("INSERT OR IGNORE INTO members (id, last_login) VALUES (?, ?)")
        .bind(id)
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await
        .unwrap();
}

/// Stage and commit a single file end to end, panicking on any validation
/// error. Seeds the owning message projection.
pub async fn commit_file(
    store: &TestStore,
    name: &str,
    mime: &str,
    data: Vec<u8>,
    message_id: i64,
) -> Attachment {
    seed_message(&store.pool, message_id).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            &format!("sess-{}", message_id),
            Some(message_id),
            vec![incoming(name, mime, data)],
        )
        .await
        .unwrap();
    let pending = &batch.files[0];
    assert!(
        pending.errors.is_empty(),
        "unexpected validation errors: {:?}",
        pending.errors
    );
    committer
        .commit(pending, Some(message_id), Some(1), Some(true))
        .await
        .unwrap()
}

pub async fn attachment_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn fetch_row(pool: &SqlitePool, id: i64) -> Option<Attachment> {
    palaver_db::AttachmentRepository::new(pool.clone())
        .get(id)
        .await
        .unwrap()
}
