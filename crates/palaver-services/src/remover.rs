//! Filtered removal with thumbnail cascade, physical unlink, approval
//! cleanup, and optional audit logging.

use palaver_core::models::{Attachment, AttachmentKind, AuditAction, RemovalFilter};
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::{AttachmentRepository, AuditLogRepository, AuditSink, DirectoryRepository, TaskRepository};
use palaver_storage::DirectoryRegistry;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::fs;

pub struct AttachmentRemover {
    config: Arc<AttachmentConfig>,
    attachments: AttachmentRepository,
    tasks: TaskRepository,
    registry: DirectoryRegistry,
    audit: Arc<dyn AuditSink>,
}

impl AttachmentRemover {
    pub fn new(pool: SqlitePool, config: Arc<AttachmentConfig>) -> Self {
        let registry =
            DirectoryRegistry::new(DirectoryRepository::new(pool.clone()), config.clone());
        Self {
            attachments: AttachmentRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            registry,
            audit: Arc::new(AuditLogRepository::new(pool)),
            config,
        }
    }

    /// Swap the audit destination, e.g. for a host with its own log table.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Delete every attachment matching the AND of `filters`, cascading
    /// both directions of the thumbnail link: deleting a parent takes its
    /// thumbnail row and file with it; deleting only a thumbnail clears
    /// the surviving parent's reference.
    ///
    /// Metadata is read in full before any unlink because the physical
    /// path depends on (id, hash, folder). When `audit` is set, each
    /// deleted row is appended to the audit sink. When `collect_affected`
    /// is set, the distinct touched message ids come back for callers
    /// that annotate post bodies.
    #[tracing::instrument(skip(self, filters), fields(filters = filters.len()))]
    pub async fn remove(
        &self,
        filters: &[RemovalFilter],
        audit: Option<AuditAction>,
        collect_affected: bool,
    ) -> Result<Option<Vec<i64>>, AppError> {
        let matched = self.attachments.select_by_filters(filters).await?;
        if matched.is_empty() {
            return Ok(collect_affected.then(Vec::new));
        }

        let matched_ids: HashSet<i64> = matched.iter().map(|r| r.id).collect();

        // Parents drag their thumbnail rows into the deletion set.
        let extra_thumb_ids: Vec<i64> = matched
            .iter()
            .filter_map(|r| r.thumbnail_id)
            .filter(|id| !matched_ids.contains(id))
            .collect();
        let mut doomed = matched;
        doomed.extend(self.attachments.get_many(&extra_thumb_ids).await?);

        for row in &doomed {
            self.unlink(row).await;
        }

        if let Some(action) = audit {
            for row in &doomed {
                self.audit
                    .append(action, row.message_id.unwrap_or(0), &row.filename)
                    .await?;
            }
        }

        let ids: Vec<i64> = doomed.iter().map(|r| r.id).collect();
        let thumb_ids: Vec<i64> = doomed
            .iter()
            .filter(|r| r.kind == AttachmentKind::Thumbnail)
            .map(|r| r.id)
            .collect();

        let deleted = self.attachments.delete_ids(&ids).await?;
        self.tasks.remove_approvals(&ids).await?;
        // Surviving parents whose thumbnail just went away.
        self.attachments.null_thumbnail_refs(&thumb_ids).await?;

        tracing::info!(rows = deleted, "attachments removed");

        if !collect_affected {
            return Ok(None);
        }
        let mut affected: Vec<i64> = doomed.iter().filter_map(|r| r.message_id).collect();
        affected.sort_unstable();
        affected.dedup();
        Ok(Some(affected))
    }

    /// Unlink a row's file. A missing file is fine (the sweep may have
    /// beaten us to it); any other failure is logged and skipped so one
    /// bad path never strands the rest of the batch's metadata.
    async fn unlink(&self, row: &Attachment) {
        let path = match row.kind {
            AttachmentKind::Avatar => self.config.avatar_directory.join(&row.filename),
            _ => match self.registry.path_of(row.folder_id).await {
                Ok(dir) => dir.join(row.disk_name()),
                Err(e) => {
                    tracing::warn!(id = row.id, error = %e, "unresolvable folder, skipping unlink");
                    return;
                }
            },
        };
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(id = row.id, path = %path.display(), error = %e, "unlink failed");
            }
        }
    }
}
