//! Commit path: record creation, final naming, approval queueing,
//! thumbnail derivation, and the avatar branch.

mod helpers;

use helpers::{commit_file, incoming, png_bytes, setup_with};
use palaver_core::models::{AttachmentKind, PendingBatch, TaskType};
use palaver_db::TaskRepository;
use palaver_services::{AttachmentStore, UploadIntake};

#[tokio::test]
async fn commit_creates_row_and_canonical_file() {
    let store = setup_with(|_| {}).await;
    let att = commit_file(&store, "photo.png", "image/png", png_bytes(16, 12), 5).await;

    assert_eq!(att.kind, AttachmentKind::Normal);
    assert_eq!(att.mime_type, "image/png");
    assert_eq!(att.extension, "png");
    assert_eq!((att.width, att.height), (16, 12));
    assert!(!att.content_hash.is_empty());

    let path = store.config.base_directories[0]
        .join(format!("{}_{}", att.id, att.content_hash));
    let meta = std::fs::metadata(&path).unwrap();
    assert_eq!(meta.len() as i64, att.size_bytes);
}

#[tokio::test]
async fn sniffed_type_wins_over_declared() {
    let store = setup_with(|_| {}).await;
    // Declared as plain text, but the bytes are a PNG.
    let att = commit_file(&store, "sneaky.png", "text/plain", png_bytes(4, 4), 6).await;
    assert_eq!(att.mime_type, "image/png");
}

#[tokio::test]
async fn unapproved_commit_queues_moderation() {
    let store = setup_with(|_| {}).await;
    helpers::seed_message(&store.pool, 9).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-9",
            Some(9),
            vec![incoming("held.png", "image/png", png_bytes(8, 8))],
        )
        .await
        .unwrap();
    let att = committer
        .commit(&batch.files[0], Some(9), Some(1), Some(false))
        .await
        .unwrap();
    assert!(!att.approved);

    let queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM approval_queue WHERE attachment_id = ?")
            .bind(att.id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
    assert_eq!(queued, 1);

    let tasks = TaskRepository::new(store.pool.clone());
    assert_eq!(tasks.pending_count(TaskType::ApprovalNotify).await.unwrap(), 1);
}

#[tokio::test]
async fn require_approval_holds_commits_unless_overridden() {
    let store = setup_with(|c| c.require_approval = true).await;
    helpers::seed_message(&store.pool, 12).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-12",
            Some(12),
            vec![
                incoming("held.png", "image/png", png_bytes(8, 8)),
                incoming("waved.png", "image/png", png_bytes(8, 8)),
            ],
        )
        .await
        .unwrap();

    // No override: the configured default holds the attachment.
    let held = committer
        .commit(&batch.files[0], Some(12), Some(1), None)
        .await
        .unwrap();
    assert!(!held.approved);
    let queued: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM approval_queue WHERE attachment_id = ?")
            .bind(held.id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
    assert_eq!(queued, 1);

    // A moderator override wins over the default.
    let waved = committer
        .commit(&batch.files[1], Some(12), Some(1), Some(true))
        .await
        .unwrap();
    assert!(waved.approved);
}

#[tokio::test]
async fn oversized_raster_gets_a_linked_thumbnail() {
    let store = setup_with(|c| {
        c.thumb_width = 64;
        c.thumb_height = 64;
    })
    .await;
    let att = commit_file(&store, "large.png", "image/png", png_bytes(256, 128), 7).await;

    let thumb_id = att.thumbnail_id.expect("thumbnail should be derived");
    let thumb = helpers::fetch_row(&store.pool, thumb_id).await.unwrap();
    assert_eq!(thumb.kind, AttachmentKind::Thumbnail);
    assert!(thumb.width <= 64 && thumb.height <= 64);
    assert_eq!(thumb.message_id, att.message_id);
    assert_eq!(thumb.approved, att.approved);

    let thumb_path = store.config.base_directories[0]
        .join(format!("{}_{}", thumb.id, thumb.content_hash));
    assert!(thumb_path.is_file());
}

#[tokio::test]
async fn small_raster_gets_no_thumbnail() {
    let store = setup_with(|c| {
        c.thumb_width = 64;
        c.thumb_height = 64;
    })
    .await;
    let att = commit_file(&store, "small.png", "image/png", png_bytes(32, 32), 8).await;
    assert!(att.thumbnail_id.is_none());
}

#[tokio::test]
async fn avatar_keeps_original_filename_in_fixed_directory() {
    let store = setup_with(|_| {}).await;
    helpers::seed_member(&store.pool, 3).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-av",
            None,
            vec![incoming("face.png", "image/png", png_bytes(20, 20))],
        )
        .await
        .unwrap();
    let avatar = committer.commit_avatar(&batch.files[0], 3).await.unwrap();

    assert_eq!(avatar.kind, AttachmentKind::Avatar);
    assert_eq!(avatar.filename, "face.png");
    assert_eq!(avatar.content_hash, "");
    assert_eq!(avatar.member_id, Some(3));
    assert!(store.config.avatar_directory.join("face.png").is_file());
}

#[tokio::test]
async fn avatar_commit_requires_a_member() {
    let store = setup_with(|_| {}).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-av",
            None,
            vec![incoming("face.png", "image/png", png_bytes(20, 20))],
        )
        .await
        .unwrap();
    assert!(committer.commit_avatar(&batch.files[0], 0).await.is_err());
}
