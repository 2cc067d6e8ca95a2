//! Upload intake: staging, the validation pipeline, and batch lifecycle.

mod helpers;

use helpers::{incoming, png_bytes, setup_with};
use palaver_core::models::{PendingBatch, UploadErrorCode};
use palaver_core::models::TaskType;
use palaver_db::TaskRepository;
use palaver_services::{AttachmentStore, UploadIntake};

#[tokio::test]
async fn directory_selection_is_stable_between_commits() {
    let store = setup_with(|_| {}).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());

    let first = intake
        .allocator()
        .select_directory_for_next_upload()
        .await
        .unwrap();
    let second = intake
        .allocator()
        .select_directory_for_next_upload()
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn bad_extension_excludes_only_the_failing_file() {
    let store = setup_with(|c| {
        c.check_extensions = true;
        c.allowed_extensions = vec!["png".into()];
    })
    .await;
    helpers::seed_message(&store.pool, 10).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let committer = AttachmentStore::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-10",
            Some(10),
            vec![
                incoming("one.png", "image/png", png_bytes(8, 8)),
                incoming("tool.exe", "application/octet-stream", vec![1, 2, 3]),
                incoming("two.png", "image/png", png_bytes(12, 12)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(batch.files.len(), 3);
    assert_eq!(batch.valid_count(), 2);
    let rejected = &batch.files[1];
    assert_eq!(rejected.errors[0].code, UploadErrorCode::BadExtension);
    assert!(rejected.temp_path.is_none());

    let mut committed = Vec::new();
    for pending in batch.files.iter().filter(|f| f.is_valid()) {
        committed.push(
            committer
                .commit(pending, Some(10), Some(1), None)
                .await
                .unwrap(),
        );
    }
    assert_eq!(committed.len(), 2);
    assert_ne!(committed[0].id, committed[1].id);
    for att in &committed {
        let path = store.config.base_directories[0].join(att.disk_name());
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len() as i64, att.size_bytes);
    }
}

#[tokio::test]
async fn oversized_file_is_rejected_without_a_trace() {
    let store = setup_with(|c| {
        c.attachment_size_limit = 500 * 1024;
    })
    .await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-1",
            None,
            vec![incoming("big.txt", "text/plain", vec![b'a'; 600 * 1024])],
        )
        .await
        .unwrap();

    let pending = &batch.files[0];
    assert!(pending
        .errors
        .iter()
        .any(|e| e.code == UploadErrorCode::TooLarge));
    assert!(pending.temp_path.is_none());
    assert_eq!(helpers::attachment_count(&store.pool).await, 0);

    // Nothing under the final naming convention, and no leftover temp.
    for entry in std::fs::read_dir(&store.config.base_directories[0]).unwrap() {
        let name = entry.unwrap().file_name();
        assert_eq!(name.to_string_lossy(), ".htaccess");
    }
}

#[tokio::test]
async fn zero_byte_file_fails_fast() {
    let store = setup_with(|_| {}).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-1",
            None,
            vec![incoming("empty.txt", "text/plain", Vec::new())],
        )
        .await
        .unwrap();

    assert_eq!(batch.files[0].errors[0].code, UploadErrorCode::ZeroByte);
    assert_eq!(batch.valid_count(), 0);
}

#[tokio::test]
async fn staging_for_an_unrelated_post_flushes_the_old_batch() {
    let store = setup_with(|_| {}).await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-a",
            None,
            vec![incoming("keep.txt", "text/plain", b"hello".to_vec())],
        )
        .await
        .unwrap();
    let old_temp = batch.files[0].temp_path.clone().unwrap();
    assert!(old_temp.exists());

    intake
        .stage(
            &mut batch,
            "sess-b",
            None,
            vec![incoming("other.txt", "text/plain", b"world".to_vec())],
        )
        .await
        .unwrap();

    assert!(!old_temp.exists());
    assert_eq!(batch.files.len(), 1);
    assert_eq!(batch.files[0].name, "other.txt");
    assert_eq!(batch.session_key, "sess-b");
}

#[tokio::test]
async fn near_limit_warning_is_sent_once() {
    let store = setup_with(|c| {
        c.dir_size_limit = 100 * 1024;
        c.space_warning_margin = 99 * 1024;
    })
    .await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());
    let tasks = TaskRepository::new(store.pool.clone());

    // Each 2KB file crosses the 1KB warning threshold; the flag must make
    // the second crossing silent.
    let mut batch = PendingBatch::default();
    for n in 0..2 {
        intake
            .stage(
                &mut batch,
                "sess-w",
                None,
                vec![incoming(
                    &format!("f{}.txt", n),
                    "text/plain",
                    vec![b'x'; 2 * 1024],
                )],
            )
            .await
            .unwrap();
    }

    let pending = tasks
        .pending_count(TaskType::DirectorySpaceWarning)
        .await
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn post_total_size_limit_counts_valid_siblings() {
    let store = setup_with(|c| {
        c.post_total_size_limit = 5 * 1024;
    })
    .await;
    let intake = UploadIntake::new(store.pool.clone(), store.config.clone());

    let mut batch = PendingBatch::default();
    intake
        .stage(
            &mut batch,
            "sess-t",
            None,
            vec![
                incoming("a.txt", "text/plain", vec![b'a'; 3 * 1024]),
                incoming("b.txt", "text/plain", vec![b'b'; 3 * 1024]),
            ],
        )
        .await
        .unwrap();

    assert!(batch.files[0].is_valid());
    assert!(batch.files[1]
        .errors
        .iter()
        .any(|e| e.code == UploadErrorCode::PostTooLarge));
}
