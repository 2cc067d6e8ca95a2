use async_trait::async_trait;
use chrono::Utc;
use palaver_core::models::AuditAction;
use palaver_core::AppError;
use sqlx::SqlitePool;

/// Append-only audit sink for destructive operations.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(
        &self,
        action: AuditAction,
        message_id: i64,
        filename: &str,
    ) -> Result<(), AppError>;
}

/// Database-backed audit sink.
#[derive(Clone)]
pub struct AuditLogRepository {
    pool: SqlitePool,
}

impl AuditLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[async_trait]
impl AuditSink for AuditLogRepository {
    #[tracing::instrument(skip(self), fields(db.table = "audit_log", db.operation = "insert", audit.action = %action))]
    async fn append(
        &self,
        action: AuditAction,
        message_id: i64,
        filename: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_log (action, message_id, filename, logged_at) VALUES (?, ?, ?, ?)",
        )
        .bind(action.to_string())
        .bind(message_id)
        .bind(filename)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
