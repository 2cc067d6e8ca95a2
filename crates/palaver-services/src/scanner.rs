//! Resumable integrity sweep over the attachment table and its
//! directories.
//!
//! `advance` runs phases in order, processing one id range (or one
//! directory) at a time and checking the wall-clock budget between
//! ranges. All counters accumulate even in dry-run; mutations are gated
//! on the progress fix set, with one exception: stale temp files past
//! `temp_max_age` are always eligible for deletion, since nothing will
//! ever finalize them.

use palaver_core::models::{
    Attachment, AttachmentKind, RepairIssue, RepairPhase, RepairProgress, RepairSummary,
    ScanOutcome,
};
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::{AttachmentRepository, DirectoryRepository};
use palaver_storage::{paths, DirectoryRegistry};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::fs;

pub struct IntegrityScanner {
    config: Arc<AttachmentConfig>,
    attachments: AttachmentRepository,
    registry: DirectoryRegistry,
}

impl IntegrityScanner {
    pub fn new(pool: SqlitePool, config: Arc<AttachmentConfig>) -> Self {
        let registry =
            DirectoryRegistry::new(DirectoryRepository::new(pool.clone()), config.clone());
        Self {
            attachments: AttachmentRepository::new(pool),
            registry,
            config,
        }
    }

    /// Run the sweep for up to `config.scan_slice`, returning either the
    /// progress to resume from or the terminal summary. Committed work is
    /// never rolled back; cancelling is simply not calling again.
    #[tracing::instrument(skip(self, progress), fields(phase = ?progress.phase, cursor = progress.cursor))]
    pub async fn advance(&self, mut progress: RepairProgress) -> Result<ScanOutcome, AppError> {
        self.registry.ensure_default().await?;
        let deadline = Instant::now() + self.config.scan_slice;

        loop {
            let phase_done = match progress.phase {
                RepairPhase::OrphanThumbnails => self.orphan_thumbnails(&mut progress).await?,
                RepairPhase::DanglingThumbnailRefs => self.dangling_refs(&mut progress).await?,
                RepairPhase::FileReconciliation => self.reconcile_files(&mut progress).await?,
                RepairPhase::AvatarsWithoutMember => self.lost_avatars(&mut progress).await?,
                RepairPhase::AttachmentsWithoutMessage => self.lost_posts(&mut progress).await?,
                RepairPhase::DirectorySweep => self.sweep_directory(&mut progress).await?,
            };
            if phase_done {
                match progress.phase.next() {
                    Some(next) => {
                        tracing::debug!(from = ?progress.phase, to = ?next, "phase complete");
                        progress.phase = next;
                        progress.cursor = 0;
                    }
                    None => {
                        tracing::info!(counts = ?progress.counts, "integrity sweep complete");
                        return Ok(ScanOutcome::Done(RepairSummary {
                            counts: progress.counts,
                            fixed: progress.fix,
                        }));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(ScanOutcome::More(progress));
            }
        }
    }

    /// Claim the next id range, or report the phase finished.
    async fn next_range(&self, progress: &mut RepairProgress) -> Result<Option<(i64, i64)>, AppError> {
        let max = self.attachments.max_id().await?;
        if progress.cursor > max {
            return Ok(None);
        }
        let lo = progress.cursor;
        let hi = lo + self.config.scan_range;
        progress.cursor = hi;
        Ok(Some((lo, hi)))
    }

    // Phase 0: thumbnail rows no parent references.
    async fn orphan_thumbnails(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let Some((lo, hi)) = self.next_range(progress).await? else {
            return Ok(true);
        };
        let orphans = self.attachments.orphan_thumbnails_in_range(lo, hi).await?;
        progress.counts.orphan_thumbnails += orphans.len() as i64;
        if progress.fixing(RepairIssue::OrphanThumbnail) && !orphans.is_empty() {
            for row in &orphans {
                self.unlink_row(row).await?;
            }
            let ids: Vec<i64> = orphans.iter().map(|r| r.id).collect();
            self.attachments.delete_ids(&ids).await?;
        }
        Ok(false)
    }

    // Phase 1: forward references at missing or non-thumbnail rows. Runs
    // after phase 0 so a reference is not nulled for a thumbnail that was
    // about to be removed anyway.
    async fn dangling_refs(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let Some((lo, hi)) = self.next_range(progress).await? else {
            return Ok(true);
        };
        let ids = self
            .attachments
            .dangling_thumbnail_refs_in_range(lo, hi)
            .await?;
        progress.counts.dangling_thumbnail_refs += ids.len() as i64;
        if progress.fixing(RepairIssue::DanglingThumbnailRef) {
            for id in ids {
                self.attachments.clear_thumbnail_ref(id).await?;
            }
        }
        Ok(false)
    }

    // Phase 2: recompute each row's expected path and reconcile against
    // the filesystem: folder drift, missing files, zero-byte files, size
    // mismatches.
    async fn reconcile_files(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let Some((lo, hi)) = self.next_range(progress).await? else {
            return Ok(true);
        };
        let rows = self.attachments.rows_in_range(lo, hi).await?;
        for row in rows {
            let expected = self.expected_path(&row).await?;
            match fs::metadata(&expected).await {
                Ok(meta) if meta.len() == 0 => {
                    progress.counts.zero_byte_files += 1;
                    if progress.fixing(RepairIssue::ZeroByteFile) {
                        remove_if_present(&expected).await;
                        self.delete_row(&row).await?;
                    }
                }
                Ok(meta) if meta.len() as i64 != row.size_bytes => {
                    progress.counts.wrong_size += 1;
                    // Disk is the source of truth for size; the file is
                    // never touched.
                    if progress.fixing(RepairIssue::FileWrongSize) {
                        self.attachments.update_size(row.id, meta.len() as i64).await?;
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    match self.find_drifted(&row).await? {
                        Some(actual_folder) => {
                            progress.counts.wrong_folder += 1;
                            if progress.fixing(RepairIssue::WrongFolder) {
                                self.attachments.update_folder(row.id, actual_folder).await?;
                            }
                        }
                        None => {
                            progress.counts.files_missing += 1;
                            if progress.fixing(RepairIssue::FileMissing) {
                                self.delete_row(&row).await?;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(id = row.id, path = %expected.display(), error = %e, "stat failed");
                }
            }
        }
        Ok(false)
    }

    // Phase 3: avatars whose owning member is gone.
    async fn lost_avatars(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let Some((lo, hi)) = self.next_range(progress).await? else {
            return Ok(true);
        };
        let rows = self.attachments.avatars_without_member_in_range(lo, hi).await?;
        progress.counts.avatars_no_member += rows.len() as i64;
        if progress.fixing(RepairIssue::AvatarNoMember) && !rows.is_empty() {
            for row in &rows {
                self.unlink_row(row).await?;
            }
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            self.attachments.delete_ids(&ids).await?;
        }
        Ok(false)
    }

    // Phase 4: attachments whose owning message is gone.
    async fn lost_posts(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let Some((lo, hi)) = self.next_range(progress).await? else {
            return Ok(true);
        };
        let rows = self
            .attachments
            .attachments_without_message_in_range(lo, hi)
            .await?;
        progress.counts.attachments_no_message += rows.len() as i64;
        if progress.fixing(RepairIssue::AttachmentNoMessage) && !rows.is_empty() {
            for row in &rows {
                self.unlink_row(row).await?;
            }
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            self.attachments.delete_ids(&ids).await?;
            // Their thumbnails become orphans; the next sweep's phase 0
            // picks them up rather than cascading here.
        }
        Ok(false)
    }

    // Phase 5: one registered directory (or the avatar directory) per
    // step, looking for files with no matching row and stale temp files.
    async fn sweep_directory(&self, progress: &mut RepairProgress) -> Result<bool, AppError> {
        let dirs = self.sweep_targets().await?;
        let Some((dir, is_avatar_dir)) = dirs.get(progress.cursor as usize) else {
            return Ok(true);
        };
        progress.cursor += 1;

        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                // Subdirectories are sweep targets in their own right.
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if paths::is_marker(&name) {
                continue;
            }
            if paths::is_temp_name(&name) {
                if self.is_stale(&meta) {
                    progress.counts.stale_temp_files += 1;
                    remove_if_present(&entry.path()).await;
                }
                continue;
            }
            let tracked = if *is_avatar_dir {
                self.attachments.avatar_exists(&name).await?
            } else {
                match paths::parse_final_name(&name) {
                    Some((id, hash)) => self.attachments.exists_with_hash(id, hash).await?,
                    None => false,
                }
            };
            if !tracked {
                progress.counts.wild_files += 1;
                if progress.fixing(RepairIssue::WildFile) {
                    remove_if_present(&entry.path()).await;
                }
            }
        }
        Ok(false)
    }

    /// Registered directories in id order, then any unregistered
    /// intermediates sitting between a registered shard and its base (the
    /// nested-shard layout registers only the leaf), then the avatar
    /// directory if it is not itself registered.
    async fn sweep_targets(&self) -> Result<Vec<(PathBuf, bool)>, AppError> {
        let mut dirs: Vec<(PathBuf, bool)> = self
            .registry
            .all()
            .await?
            .into_iter()
            .map(|d| (PathBuf::from(d.path), false))
            .collect();
        let registered: Vec<PathBuf> = dirs.iter().map(|(p, _)| p.clone()).collect();
        for path in &registered {
            let mut cursor = path.as_path();
            while let Some(parent) = cursor.parent() {
                if !self
                    .config
                    .base_directories
                    .iter()
                    .any(|b| parent.starts_with(b))
                {
                    break;
                }
                if !dirs.iter().any(|(p, _)| p.as_path() == parent) {
                    dirs.push((parent.to_path_buf(), false));
                }
                cursor = parent;
            }
        }
        if !dirs.iter().any(|(p, _)| *p == self.config.avatar_directory) {
            dirs.push((self.config.avatar_directory.clone(), true));
        }
        Ok(dirs)
    }

    fn is_stale(&self, meta: &std::fs::Metadata) -> bool {
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= self.config.temp_max_age)
            .unwrap_or(false)
    }

    async fn expected_path(&self, row: &Attachment) -> Result<PathBuf, AppError> {
        if row.kind == AttachmentKind::Avatar {
            Ok(self.config.avatar_directory.join(&row.filename))
        } else {
            Ok(self.registry.path_of(row.folder_id).await?.join(row.disk_name()))
        }
    }

    /// Search the other registered directories for a row's file; rotation
    /// is global, so a file can legitimately sit in a sibling folder.
    async fn find_drifted(&self, row: &Attachment) -> Result<Option<i64>, AppError> {
        if row.kind == AttachmentKind::Avatar {
            return Ok(None);
        }
        let name = row.disk_name();
        for dir in self.registry.all().await? {
            if dir.folder_id == row.folder_id {
                continue;
            }
            if Path::new(&dir.path).join(&name).is_file() {
                return Ok(Some(dir.folder_id));
            }
        }
        Ok(None)
    }

    async fn unlink_row(&self, row: &Attachment) -> Result<(), AppError> {
        let path = self.expected_path(row).await?;
        remove_if_present(&path).await;
        Ok(())
    }

    /// Delete a row together with any forward references at it.
    async fn delete_row(&self, row: &Attachment) -> Result<(), AppError> {
        self.attachments.delete_ids(&[row.id]).await?;
        if row.kind == AttachmentKind::Thumbnail {
            self.attachments.null_thumbnail_refs(&[row.id]).await?;
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "remove failed"),
    }
}
