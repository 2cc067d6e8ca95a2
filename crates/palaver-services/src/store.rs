//! Attachment commit: turning a validated temp object into a permanent
//! record plus file, deriving a thumbnail when the source warrants one.

use palaver_core::models::{Attachment, AttachmentKind, NewAttachment, PendingUpload, TaskType};
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::{AttachmentRepository, DirectoryRepository, TaskRepository};
use palaver_processing::{image as img, svg};
use palaver_storage::{paths, DirectoryAllocator, DirectoryRegistry};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

pub struct AttachmentStore {
    config: Arc<AttachmentConfig>,
    attachments: AttachmentRepository,
    tasks: TaskRepository,
    allocator: DirectoryAllocator,
}

impl AttachmentStore {
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

    /// Commit a validated temp object as a permanent attachment.
    ///
    /// `approved` is the moderation override; `None` falls back to the
    /// configured default, so stores running with `require_approval` hold
    /// every new attachment unless the caller (a moderator path) says
    /// otherwise.
    ///
    /// The record insert is the single fatal step: a failure there is a
    /// metadata-store problem, not a data-quality one, so it propagates hard
    /// and the temp file is left in place for cleanup. Everything after the
    /// insert keys the on-disk name off the generated id, which is why no
    /// extra lock is needed around the rename.
    #[tracing::instrument(skip(self, pending), fields(file = %pending.name))]
    pub async fn commit(
        &self,
        pending: &PendingUpload,
        message_id: Option<i64>,
        member_id: Option<i64>,
        approved: Option<bool>,
    ) -> Result<Attachment, AppError> {
        let approved = approved.unwrap_or(!self.config.require_approval);
        let temp_path = self.committable(pending)?;
        let data = fs::read(&temp_path).await?;

        let is_svg = pending.mime == "image/svg+xml" || paths::extension_of(&pending.name) == "svg";
        let probed = if is_svg { None } else { img::probe(&data) };

        // Sniffed type wins over the declared one.
        let mime = match probed {
            Some(p) => img::mime_of(p.format).to_string(),
            None if is_svg => "image/svg+xml".to_string(),
            None => pending.mime.clone(),
        };
        let (width, height) = match probed {
            Some(p) => (p.width as i64, p.height as i64),
            None if is_svg => svg::dimensions(&data)
                .map(|(w, h)| (w as i64, h as i64))
                .unwrap_or((0, 0)),
            None => (0, 0),
        };

        let mut extension = paths::extension_of(&pending.name);
        if extension.is_empty() {
            if let Some(p) = probed {
                extension = img::extension_of(p.format).to_string();
            }
        }
        let content_hash = hex::encode(Sha256::digest(&data));

        let row = NewAttachment {
            folder_id: pending.folder_id,
            message_id,
            member_id,
            filename: pending.name.clone(),
            content_hash: content_hash.clone(),
            extension,
            size_bytes: data.len() as i64,
            width,
            height,
            mime_type: mime,
            kind: AttachmentKind::Normal,
            approved,
        };
        let id = match self.attachments.insert(&row).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, file = %pending.name, "attachment metadata insert failed");
                return Err(e);
            }
        };

        let folder = self.registry().path_of(pending.folder_id).await?;
        fs::rename(&temp_path, folder.join(paths::final_name(id, &content_hash))).await?;

        if !approved {
            self.tasks
                .queue_approval(id, message_id.unwrap_or(0))
                .await?;
            self.tasks
                .enqueue(
                    TaskType::ApprovalNotify,
                    serde_json::json!({ "attachment_id": id, "message_id": message_id }),
                )
                .await?;
        }

        let mut attachment = self
            .attachments
            .get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("attachment {} vanished after insert", id)))?;

        if self.needs_thumbnail(&attachment) {
            if let Some(thumb) = self.derive_thumbnail(&attachment, &data).await? {
                attachment.thumbnail_id = Some(thumb.id);
            }
        }
        tracing::info!(id, size = attachment.size_bytes, "attachment committed");
        Ok(attachment)
    }

    /// Commit a validated temp object as a member avatar. Avatars bypass
    /// registry sharding: original filename, fixed directory, no hash
    /// suffix, no thumbnail.
    #[tracing::instrument(skip(self, pending), fields(file = %pending.name, member_id))]
    pub async fn commit_avatar(
        &self,
        pending: &PendingUpload,
        member_id: i64,
    ) -> Result<Attachment, AppError> {
        if member_id <= 0 {
            return Err(AppError::InvalidInput("avatar requires a member id".into()));
        }
        let temp_path = self.committable(pending)?;
        let data = fs::read(&temp_path).await?;

        let probed = img::probe(&data);
        let mime = probed
            .map(|p| img::mime_of(p.format).to_string())
            .unwrap_or_else(|| pending.mime.clone());
        let (width, height) = probed
            .map(|p| (p.width as i64, p.height as i64))
            .unwrap_or((0, 0));

        fs::create_dir_all(&self.config.avatar_directory)
            .await
            .map_err(|e| {
                AppError::DirectoryNotCreatable(format!(
                    "{}: {}",
                    self.config.avatar_directory.display(),
                    e
                ))
            })?;

        let row = NewAttachment {
            folder_id: 1,
            message_id: None,
            member_id: Some(member_id),
            filename: pending.name.clone(),
            content_hash: String::new(),
            extension: paths::extension_of(&pending.name),
            size_bytes: data.len() as i64,
            width,
            height,
            mime_type: mime,
            kind: AttachmentKind::Avatar,
            approved: true,
        };
        let id = self.attachments.insert(&row).await?;
        fs::rename(&temp_path, self.config.avatar_directory.join(&pending.name)).await?;

        self.attachments
            .get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("avatar {} vanished after insert", id)))
    }

    /// Derive and link a thumbnail for `parent`, applying the same quota
    /// rollover to the thumbnail's own bytes. Returns the thumbnail row.
    pub async fn derive_thumbnail(
        &self,
        parent: &Attachment,
        data: &[u8],
    ) -> Result<Option<Attachment>, AppError> {
        if !self.needs_thumbnail(parent) {
            return Ok(None);
        }
        let rendition = match img::thumbnail(data, self.config.thumb_width, self.config.thumb_height)
        {
            Ok(r) => r,
            Err(e) => {
                // A broken source raster cannot fail the commit itself.
                tracing::warn!(parent = parent.id, error = %e, "thumbnail derivation failed");
                return Ok(None);
            }
        };

        // Thumbnails land in the currently-active directory, which may
        // differ from the parent's folder after rotation.
        let mut folder_id = self.allocator.select_directory_for_next_upload().await?;
        let folder = self.registry().path_of(folder_id).await?;
        let mut temp_path = folder.join(paths::temp_name(Uuid::new_v4()));
        fs::write(&temp_path, &rendition.data).await.map_err(|e| {
            AppError::DirectoryNotWritable(format!("{}: {}", folder.display(), e))
        })?;

        let staged: Vec<PathBuf> = vec![temp_path.clone()];
        if let Some((new_folder, moved)) = self.allocator.rotate_if_full(folder_id, &staged).await? {
            folder_id = new_folder;
            if let Some(path) = moved.into_iter().next() {
                temp_path = path;
            }
        }

        let content_hash = hex::encode(Sha256::digest(&rendition.data));
        let row = NewAttachment {
            folder_id,
            message_id: parent.message_id,
            member_id: None,
            filename: format!("{}_thumb", parent.filename),
            content_hash: content_hash.clone(),
            extension: rendition.extension.to_string(),
            size_bytes: rendition.data.len() as i64,
            width: rendition.width as i64,
            height: rendition.height as i64,
            mime_type: rendition.mime.to_string(),
            kind: AttachmentKind::Thumbnail,
            approved: parent.approved,
        };
        let thumb_id = self.attachments.insert(&row).await?;

        let folder_path = self.registry().path_of(folder_id).await?;
        fs::rename(
            &temp_path,
            folder_path.join(paths::final_name(thumb_id, &content_hash)),
        )
        .await?;
        self.attachments.set_thumbnail(parent.id, thumb_id).await?;

        tracing::debug!(parent = parent.id, thumbnail = thumb_id, "thumbnail derived");
        self.attachments.get(thumb_id).await
    }

    /// Whether the raster exceeds the thumbnail thresholds.
    pub fn needs_thumbnail(&self, attachment: &Attachment) -> bool {
        self.config.thumbnails_enabled
            && attachment.kind == AttachmentKind::Normal
            && attachment.mime_type != "image/svg+xml"
            && attachment.is_image()
            && attachment.thumbnail_id.is_none()
            && (attachment.width > self.config.thumb_width as i64
                || attachment.height > self.config.thumb_height as i64)
    }

    pub fn registry(&self) -> &DirectoryRegistry {
        self.allocator.registry()
    }

    fn committable(&self, pending: &PendingUpload) -> Result<PathBuf, AppError> {
        if !pending.errors.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "refusing to commit {}: {} validation error(s)",
                pending.name,
                pending.errors.len()
            )));
        }
        pending
            .temp_path
            .clone()
            .ok_or_else(|| AppError::InvalidInput(format!("{} has no staged file", pending.name)))
    }
}
