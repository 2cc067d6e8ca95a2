//! Batch read path: grouping, ordering, geometry, caching, and lazy
//! thumbnail regeneration.

mod helpers;

use helpers::{commit_file, incoming, png_bytes, setup_with};
use palaver_core::models::PendingBatch;
use palaver_services::{AllowAll, AttachmentReader, AttachmentStore, UploadIntake};

#[tokio::test]
async fn attachments_group_by_message() {
    let store = setup_with(|_| {}).await;
    commit_file(&store, "a.png", "image/png", png_bytes(8, 8), 200).await;
    commit_file(&store, "b.png", "image/png", png_bytes(8, 8), 200).await;
    commit_file(&store, "c.png", "image/png", png_bytes(8, 8), 201).await;

    let mut reader = AttachmentReader::new(store.pool.clone(), store.config.clone());
    let loaded = reader
        .load_for_messages(&[200, 201, 202], &AllowAll)
        .await
        .unwrap();

    assert_eq!(loaded[&200].len(), 2);
    assert_eq!(loaded[&201].len(), 1);
    assert!(loaded[&202].is_empty());
}

#[tokio::test]
async fn unapproved_attachments_sort_after_approved() {
    let store = setup_with(|_| {}).await;
    helpers::seed_message(&store.pool, 210).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-210",
            Some(210),
            vec![
                incoming("held.png", "image/png", png_bytes(8, 8)),
                incoming("shown.png", "image/png", png_bytes(8, 8)),
            ],
        )
        .await
        .unwrap();
    committer
        .commit(&batch.files[0], Some(210), Some(1), Some(false))
        .await
        .unwrap();
    committer
        .commit(&batch.files[1], Some(210), Some(1), Some(true))
        .await
        .unwrap();

    let mut reader = AttachmentReader::new(store.pool.clone(), store.config.clone());
    let loaded = reader.load_for_messages(&[210], &AllowAll).await.unwrap();
    let list = &loaded[&210];
    assert_eq!(list.len(), 2);
    assert!(list[0].attachment.approved);
    assert!(!list[1].attachment.approved);
}

#[tokio::test]
async fn oversized_image_without_thumbnail_is_downscaled_inline() {
    let store = setup_with(|c| {
        c.thumbnails_enabled = false;
        c.max_width = 100;
        c.max_height = 100;
    })
    .await;
    commit_file(&store, "wide.png", "image/png", png_bytes(400, 200), 220).await;

    let mut reader = AttachmentReader::new(store.pool.clone(), store.config.clone());
    let loaded = reader.load_for_messages(&[220], &AllowAll).await.unwrap();
    let display = &loaded[&220][0];

    assert!(display.thumbnail.is_none());
    assert_eq!((display.display_width, display.display_height), (100, 50));
    assert!(!display.expand_on_click);
}

#[tokio::test]
async fn oversized_image_with_thumbnail_expands_on_click() {
    let store = setup_with(|c| {
        c.thumb_width = 64;
        c.thumb_height = 64;
        c.max_width = 100;
        c.max_height = 100;
    })
    .await;
    let att = commit_file(&store, "big.png", "image/png", png_bytes(400, 200), 221).await;
    assert!(att.thumbnail_id.is_some());

    let mut reader = AttachmentReader::new(store.pool.clone(), store.config.clone());
    let loaded = reader.load_for_messages(&[221], &AllowAll).await.unwrap();
    let display = &loaded[&221][0];

    let thumb = display.thumbnail.expect("thumbnail info should be loaded");
    assert!(thumb.width <= 64 && thumb.height <= 64);
    assert!(display.expand_on_click);
    assert_eq!(display.display_width, 400);
}

#[tokio::test]
async fn missing_thumbnail_is_regenerated_lazily() {
    // Committed when thumbnails were off, read when they are on.
    let store = setup_with(|c| {
        c.thumbnails_enabled = false;
    })
    .await;
    let att = commit_file(&store, "late.png", "image/png", png_bytes(256, 128), 230).await;
    assert!(att.thumbnail_id.is_none());

    let mut config = (*store.config).clone();
    config.thumbnails_enabled = true;
    config.thumb_width = 64;
    config.thumb_height = 64;
    let mut reader = AttachmentReader::new(store.pool.clone(), std::sync::Arc::new(config));
    let loaded = reader.load_for_messages(&[230], &AllowAll).await.unwrap();
    let display = &loaded[&230][0];

    let thumb = display.thumbnail.expect("thumbnail should be derived on read");
    let row = helpers::fetch_row(&store.pool, att.id).await.unwrap();
    assert_eq!(row.thumbnail_id, Some(thumb.id));
    let thumb_row = helpers::fetch_row(&store.pool, thumb.id).await.unwrap();
    assert!(thumb_row.width <= 64 && thumb_row.height <= 64);
}

#[tokio::test]
async fn loaded_messages_are_served_from_the_cache() {
    let store = setup_with(|_| {}).await;
    let att = commit_file(&store, "a.png", "image/png", png_bytes(8, 8), 240).await;

    let mut reader = AttachmentReader::new(store.pool.clone(), store.config.clone());
    let first = reader.load_for_messages(&[240], &AllowAll).await.unwrap();
    assert_eq!(first[&240].len(), 1);

    // Changes behind the reader's back are invisible to a cached id.
    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(att.id)
        .execute(&store.pool)
        .await
        .unwrap();
    let second = reader.load_for_messages(&[240], &AllowAll).await.unwrap();
    assert_eq!(second[&240].len(), 1);
}
