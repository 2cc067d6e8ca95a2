use palaver_core::models::{Attachment, NewAttachment, RemovalFilter};
use palaver_core::AppError;
use sqlx::SqlitePool;

use crate::filter::{compile, SqlArg};

const ATTACHMENT_COLUMNS: &str = "id, folder_id, message_id, member_id, filename, content_hash, \
     extension, size_bytes, width, height, mime_type, kind, thumbnail_id, approved, downloads";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Repository for attachment rows.
#[derive(Clone)]
pub struct AttachmentRepository {
    pool: SqlitePool,
}

impl AttachmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomic insert; the generated id is the only safe source for the final
    /// on-disk name, so the caller renames the temp file after this returns.
    #[tracing::instrument(skip(self, row), fields(db.table = "attachments", db.operation = "insert"))]
    pub async fn insert(&self, row: &NewAttachment) -> Result<i64, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO attachments
                (folder_id, message_id, member_id, filename, content_hash, extension,
                 size_bytes, width, height, mime_type, kind, thumbnail_id, approved, downloads)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, 0)
            RETURNING id
            "#,
        )
        .bind(row.folder_id)
        .bind(row.message_id)
        .bind(row.member_id)
        .bind(&row.filename)
        .bind(&row.content_hash)
        .bind(&row.extension)
        .bind(row.size_bytes)
        .bind(row.width)
        .bind(row.height)
        .bind(&row.mime_type)
        .bind(row.kind as i64)
        .bind(row.approved)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    #[tracing::instrument(skip(self), fields(db.table = "attachments", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: i64) -> Result<Option<Attachment>, AppError> {
        let row = sqlx::query_as::<_, Attachment>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<Attachment>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, Attachment>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Batch load of non-thumbnail rows for a set of messages, unapproved
    /// rows stably sorted after approved ones.
    #[tracing::instrument(skip(self, message_ids), fields(db.table = "attachments", db.operation = "select"))]
    pub async fn for_messages(&self, message_ids: &[i64]) -> Result<Vec<Attachment>, AppError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments \
             WHERE message_id IN ({}) AND kind != 3 \
             ORDER BY approved DESC, id ASC",
            placeholders(message_ids.len())
        );
        let mut query = sqlx::query_as::<_, Attachment>(&sql);
        for id in message_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Committed attachment count already owned by a message (for the
    /// per-post file-count ceiling).
    pub async fn count_for_message(&self, message_id: i64) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM attachments WHERE message_id = ? AND kind != 3",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "attachments", db.operation = "update"))]
    pub async fn set_thumbnail(&self, parent_id: i64, thumbnail_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE attachments SET thumbnail_id = ? WHERE id = ?")
            .bind(thumbnail_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_folder(&self, id: i64, folder_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE attachments SET folder_id = ? WHERE id = ?")
            .bind(folder_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_size(&self, id: i64, size_bytes: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE attachments SET size_bytes = ? WHERE id = ?")
            .bind(size_bytes)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "attachments", db.operation = "delete"))]
    pub async fn delete_ids(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM attachments WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Null out forward references to thumbnails that no longer exist.
    /// Run after the thumbnail rows themselves were deleted so only
    /// surviving parents are touched.
    pub async fn null_thumbnail_refs(&self, thumbnail_ids: &[i64]) -> Result<u64, AppError> {
        if thumbnail_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE attachments SET thumbnail_id = NULL WHERE thumbnail_id IN ({})",
            placeholders(thumbnail_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in thumbnail_ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    pub async fn max_id(&self) -> Result<i64, AppError> {
        let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM attachments")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    /// Existence probe for the directory sweep: is `<id>_<hash>` a tracked
    /// file name?
    pub async fn exists_with_hash(&self, id: i64, content_hash: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM attachments WHERE id = ? AND content_hash = ?)",
        )
        .bind(id)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Existence probe for the avatar-directory sweep, where files carry
    /// the original filename instead of `<id>_<hash>`.
    pub async fn avatar_exists(&self, filename: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM attachments WHERE kind = 1 AND filename = ?)",
        )
        .bind(filename)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    // --- id-range queries for the integrity scanner ---

    /// Thumbnail-kind rows in [lo, hi) that no parent references.
    pub async fn orphan_thumbnails_in_range(
        &self,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<Attachment>, AppError> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a \
             WHERE a.kind = 3 AND a.id >= ? AND a.id < ? \
               AND NOT EXISTS (SELECT 1 FROM attachments p WHERE p.thumbnail_id = a.id) \
             ORDER BY a.id"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Rows in [lo, hi) whose `thumbnail_id` points at a missing or
    /// non-thumbnail row, plus thumbnail-kind rows carrying their own
    /// forward reference (invariant violation either way).
    pub async fn dangling_thumbnail_refs_in_range(
        &self,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT a.id FROM attachments a \
             WHERE a.thumbnail_id IS NOT NULL AND a.id >= ? AND a.id < ? \
               AND (a.kind = 3 OR NOT EXISTS \
                    (SELECT 1 FROM attachments t WHERE t.id = a.thumbnail_id AND t.kind = 3)) \
             ORDER BY a.id",
        )
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn clear_thumbnail_ref(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE attachments SET thumbnail_id = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All rows in [lo, hi), any kind (filesystem reconciliation phase).
    pub async fn rows_in_range(&self, lo: i64, hi: i64) -> Result<Vec<Attachment>, AppError> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments \
             WHERE id >= ? AND id < ? ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Avatar-kind rows in [lo, hi) whose owning member is gone.
    pub async fn avatars_without_member_in_range(
        &self,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<Attachment>, AppError> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a \
             WHERE a.kind = 1 AND a.id >= ? AND a.id < ? \
               AND (a.member_id IS NULL \
                    OR NOT EXISTS (SELECT 1 FROM members m WHERE m.id = a.member_id)) \
             ORDER BY a.id"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Normal-kind rows in [lo, hi) whose owning message is gone.
    pub async fn attachments_without_message_in_range(
        &self,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<Attachment>, AppError> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a \
             WHERE a.kind = 0 AND a.id >= ? AND a.id < ? \
               AND (a.message_id IS NULL \
                    OR NOT EXISTS (SELECT 1 FROM messages m WHERE m.id = a.message_id)) \
             ORDER BY a.id"
        );
        Ok(sqlx::query_as::<_, Attachment>(&sql)
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Full metadata for every row matching the AND-composed filter set,
    /// joined against the host projections for the dated predicates.
    #[tracing::instrument(skip(self, filters), fields(db.table = "attachments", db.operation = "select"))]
    pub async fn select_by_filters(
        &self,
        filters: &[RemovalFilter],
    ) -> Result<Vec<Attachment>, AppError> {
        let (where_clause, args) = compile(filters);
        let sql = format!(
            "SELECT a.id, a.folder_id, a.message_id, a.member_id, a.filename, a.content_hash, \
                    a.extension, a.size_bytes, a.width, a.height, a.mime_type, a.kind, \
                    a.thumbnail_id, a.approved, a.downloads \
             FROM attachments a \
             LEFT JOIN messages m ON m.id = a.message_id \
             LEFT JOIN members mb ON mb.id = a.member_id \
             WHERE {where_clause} \
             ORDER BY a.id"
        );
        let mut query = sqlx::query_as::<_, Attachment>(&sql);
        for arg in &args {
            match arg {
                SqlArg::I64(v) => query = query.bind(v),
            }
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}
