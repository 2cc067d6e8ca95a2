//! Upload intake: staging and the per-file validation pipeline.
//!
//! Raw uploads are moved into the active directory under a temporary name
//! *before* validation, so quota checks see real bytes and a failed
//! validation never collides with a final name. Validation failures are
//! per-item and recoverable: the failing file collects a structured error
//! and its siblings proceed. Only capability failures (directory not
//! creatable/writable, restricted root) abort the whole batch, before any
//! per-file work.

use palaver_core::models::{
    IncomingFile, PendingBatch, PendingUpload, TaskType, UploadError, UploadErrorCode,
};
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::{AttachmentRepository, DirectoryRepository, TaskRepository};
use palaver_processing::{image as img, safety, svg};
use palaver_storage::{paths, DirectoryAllocator, DirectoryRegistry};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// Settings flag guarding the one-time near-limit admin warning.
const SPACE_WARNING_SENT_KEY: &str = "space_warning_sent";

pub struct UploadIntake {
    config: Arc<AttachmentConfig>,
    attachments: AttachmentRepository,
    tasks: TaskRepository,
    allocator: DirectoryAllocator,
}

impl UploadIntake {
    pub fn new(pool: SqlitePool, config: Arc<AttachmentConfig>) -> Self {
        let registry =
            DirectoryRegistry::new(DirectoryRepository::new(pool.clone()), config.clone());
        Self {
            attachments: AttachmentRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool),
            allocator: DirectoryAllocator::new(registry, config.clone()),
            config,
        }
    }

    pub fn allocator(&self) -> &DirectoryAllocator {
        &self.allocator
    }

    /// Stage a set of raw uploads into `batch`, validating each one.
    ///
    /// A batch for an unrelated post flushes the previous batch first;
    /// staged files otherwise survive the edit-preview round trip of the
    /// owning post.
    #[tracing::instrument(skip(self, batch, files), fields(files = files.len()))]
    pub async fn stage(
        &self,
        batch: &mut PendingBatch,
        session_key: &str,
        message_id: Option<i64>,
        files: Vec<IncomingFile>,
    ) -> Result<(), AppError> {
        if !batch.files.is_empty() && !batch.is_same_post(session_key, message_id) {
            tracing::debug!(
                stale = %batch.session_key,
                new = session_key,
                "flushing stale upload batch"
            );
            self.flush(batch).await?;
        }
        batch.session_key = session_key.to_string();
        if batch.message_id.is_none() {
            batch.message_id = message_id;
        }

        // Capability failures surface here, before any per-file validation.
        let mut active_folder = self.allocator.select_directory_for_next_upload().await?;

        // Committed attachments already on the post count toward the ceiling.
        let committed = match batch.message_id {
            Some(id) => self.attachments.count_for_message(id).await?,
            None => 0,
        };

        for file in files {
            let pending = self
                .stage_one(batch, &mut active_folder, committed, file)
                .await?;
            if pending.is_valid() {
                batch.total_bytes += pending.size;
            }
            batch.files.push(pending);
        }
        Ok(())
    }

    /// Delete all temp objects and clear the batch.
    pub async fn flush(&self, batch: &mut PendingBatch) -> Result<(), AppError> {
        for file in &batch.files {
            if let Some(path) = &file.temp_path {
                match fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file")
                    }
                }
            }
        }
        *batch = PendingBatch::default();
        Ok(())
    }

    async fn stage_one(
        &self,
        batch: &PendingBatch,
        active_folder: &mut i64,
        committed: i64,
        file: IncomingFile,
    ) -> Result<PendingUpload, AppError> {
        let registry = self.allocator.registry();
        let folder_path = registry.path_of(*active_folder).await?;

        let temp_id = Uuid::new_v4();
        let temp_path = folder_path.join(paths::temp_name(temp_id));
        // A failing write here means the active directory is unusable, which
        // downgrades the whole batch.
        fs::write(&temp_path, &file.data).await.map_err(|e| {
            AppError::DirectoryNotWritable(format!("{}: {}", folder_path.display(), e))
        })?;

        let mut pending = PendingUpload {
            temp_id,
            temp_path: Some(temp_path),
            name: paths::sanitize_filename(&file.name),
            size: file.data.len() as u64,
            mime: file.mime,
            folder_id: *active_folder,
            errors: Vec::new(),
        };

        self.validate(batch, active_folder, committed, &mut pending, file.data)
            .await?;

        if !pending.errors.is_empty() {
            // Quota rollback: the staged bytes leave the directory so later
            // files in the batch validate against correct totals.
            if let Some(path) = pending.temp_path.take() {
                if let Err(e) = fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove rejected temp file");
                }
            }
            tracing::debug!(
                file = %pending.name,
                errors = pending.errors.len(),
                "upload failed validation"
            );
        }
        Ok(pending)
    }

    async fn validate(
        &self,
        batch: &PendingBatch,
        active_folder: &mut i64,
        committed: i64,
        pending: &mut PendingUpload,
        mut data: Vec<u8>,
    ) -> Result<(), AppError> {
        // 1. Zero-byte files fail immediately; nothing else is worth checking.
        if data.is_empty() {
            pending
                .errors
                .push(UploadError::new(UploadErrorCode::ZeroByte, []));
            return Ok(());
        }

        let is_svg = pending.mime == "image/svg+xml" || paths::extension_of(&pending.name) == "svg";

        // 2. Embedded-payload scan for raster images, with the lossless
        //    re-encode remediation when enabled.
        if !is_svg && img::sniff_format(&data).is_some() && !safety::image_payload_is_safe(&data) {
            if self.config.reencode_unsafe_images {
                match img::reencode(&data) {
                    Ok(rendition) if safety::image_payload_is_safe(&rendition.data) => {
                        tracing::info!(file = %pending.name, "re-encoded unsafe image");
                        if rendition.mime != pending.mime {
                            pending.mime = rendition.mime.to_string();
                            pending.name = replace_extension(&pending.name, rendition.extension);
                        }
                        pending.size = rendition.data.len() as u64;
                        data = rendition.data;
                        if let Some(path) = &pending.temp_path {
                            fs::write(path, &data).await?;
                        }
                    }
                    _ => {
                        pending
                            .errors
                            .push(UploadError::new(UploadErrorCode::UnsafeContent, []));
                    }
                }
            } else {
                pending
                    .errors
                    .push(UploadError::new(UploadErrorCode::UnsafeContent, []));
            }
        }

        // 3. SVG structural validation.
        if is_svg {
            if let Err(reason) = svg::validate(&data) {
                pending.errors.push(UploadError::new(
                    UploadErrorCode::InvalidSvg,
                    [reason.to_string()],
                ));
            }
        }

        // 4. Directory quota, with rollover where the policy allows it.
        let registry = self.allocator.registry();
        let usage = registry.usage(*active_folder).await?;
        if self.allocator.exceeds(usage) {
            let staged: Vec<PathBuf> = pending.temp_path.iter().cloned().collect();
            let mut rotated = false;
            if pending.errors.is_empty() {
                if let Some((new_folder, moved)) =
                    self.allocator.rotate_if_full(*active_folder, &staged).await?
                {
                    *active_folder = new_folder;
                    pending.folder_id = new_folder;
                    pending.temp_path = moved.into_iter().next();
                    rotated = true;
                }
            }
            if !rotated {
                pending
                    .errors
                    .push(UploadError::new(UploadErrorCode::DirectoryFull, []));
            }
        } else if self.allocator.near_limit(usage) {
            self.warn_space_once(*active_folder, usage.bytes).await?;
        }

        // 5. Per-file size limit.
        if self.config.attachment_size_limit > 0 && pending.size > self.config.attachment_size_limit
        {
            pending.errors.push(UploadError::new(
                UploadErrorCode::TooLarge,
                [(self.config.attachment_size_limit / 1024).to_string()],
            ));
        }

        // 6. Cumulative per-post size limit.
        if self.config.post_total_size_limit > 0
            && batch.total_bytes + pending.size > self.config.post_total_size_limit
        {
            pending.errors.push(UploadError::new(
                UploadErrorCode::PostTooLarge,
                [(self.config.post_total_size_limit / 1024).to_string()],
            ));
        }

        // 7. Per-post file-count limit.
        let limit = self.config.effective_post_count_limit() as i64;
        if committed + batch.valid_count() as i64 + 1 > limit {
            pending.errors.push(UploadError::new(
                UploadErrorCode::TooManyFiles,
                [limit.to_string()],
            ));
        }

        // 8. Extension allow-list.
        if self.config.check_extensions {
            let ext = paths::extension_of(&pending.name);
            if !self.config.allowed_extensions.contains(&ext) {
                pending.errors.push(UploadError::new(
                    UploadErrorCode::BadExtension,
                    [self.config.allowed_extensions.join(", ")],
                ));
            }
        }

        Ok(())
    }

    /// One-time admin notification when the active directory crosses the
    /// near-limit threshold, guarded by a settings flag.
    async fn warn_space_once(&self, folder_id: i64, bytes: u64) -> Result<(), AppError> {
        let repo = self.allocator.registry().repo();
        if repo.get_setting(SPACE_WARNING_SENT_KEY).await?.is_some() {
            return Ok(());
        }
        repo.set_setting(SPACE_WARNING_SENT_KEY, "1").await?;
        self.tasks
            .enqueue(
                TaskType::DirectorySpaceWarning,
                serde_json::json!({ "folder_id": folder_id, "bytes_used": bytes }),
            )
            .await?;
        tracing::warn!(folder_id, bytes, "attachment directory is close to its space limit");
        Ok(())
    }
}

fn replace_extension(name: &str, extension: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, extension),
        _ => format!("{}.{}", name, extension),
    }
}
