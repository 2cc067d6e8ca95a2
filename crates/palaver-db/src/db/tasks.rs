use palaver_core::models::TaskType;
use palaver_core::AppError;
use sqlx::SqlitePool;

/// Repository for the durable background-task queue and the moderation
/// approval queue. Tasks are consumed out of process; nothing here blocks
/// on delivery.
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fire-and-forget enqueue of a work-queue record.
    #[tracing::instrument(skip(self, payload), fields(db.table = "background_tasks", db.operation = "insert", task.type = %task_type))]
    pub async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<i64, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO background_tasks (task_type, payload, claimed_at) \
             VALUES (?, ?, 0) RETURNING id",
        )
        .bind(task_type.to_string())
        .bind(payload.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn pending_count(&self, task_type: TaskType) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM background_tasks WHERE task_type = ? AND claimed_at = 0",
        )
        .bind(task_type.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "approval_queue", db.operation = "insert"))]
    pub async fn queue_approval(
        &self,
        attachment_id: i64,
        message_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO approval_queue (attachment_id, message_id) VALUES (?, ?)")
            .bind(attachment_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop approval-queue entries for deleted attachments.
    pub async fn remove_approvals(&self, attachment_ids: &[i64]) -> Result<u64, AppError> {
        if attachment_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM approval_queue WHERE attachment_id IN ({})",
            vec!["?"; attachment_ids.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for id in attachment_ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}
