use palaver_core::models::DirectoryEntry;
use palaver_core::AppError;
use sqlx::SqlitePool;

/// Settings key holding the current-folder pointer.
const CURRENT_FOLDER_KEY: &str = "current_folder";

/// Repository for the persisted directory registry and the small settings
/// key/value table (current-folder pointer, one-shot flags).
#[derive(Clone)]
pub struct DirectoryRepository {
    pool: SqlitePool,
}

impl DirectoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "directories", db.operation = "select"))]
    pub async fn list(&self) -> Result<Vec<DirectoryEntry>, AppError> {
        Ok(sqlx::query_as::<_, DirectoryEntry>(
            "SELECT folder_id, path FROM directories ORDER BY folder_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn by_id(&self, folder_id: i64) -> Result<Option<DirectoryEntry>, AppError> {
        Ok(sqlx::query_as::<_, DirectoryEntry>(
            "SELECT folder_id, path FROM directories WHERE folder_id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn by_path(&self, path: &str) -> Result<Option<DirectoryEntry>, AppError> {
        Ok(sqlx::query_as::<_, DirectoryEntry>(
            "SELECT folder_id, path FROM directories WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Register a new directory under `max(folder_id) + 1`.
    #[tracing::instrument(skip(self), fields(db.table = "directories", db.operation = "insert"))]
    pub async fn register(&self, path: &str) -> Result<i64, AppError> {
        let folder_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO directories (folder_id, path) \
             SELECT COALESCE(MAX(folder_id), 0) + 1, ? FROM directories \
             RETURNING folder_id",
        )
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(folder_id)
    }

    /// Current-folder pointer; None before the registry is seeded.
    pub async fn current(&self) -> Result<Option<i64>, AppError> {
        Ok(self
            .get_setting(CURRENT_FOLDER_KEY)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn set_current(&self, folder_id: i64) -> Result<(), AppError> {
        self.set_setting(CURRENT_FOLDER_KEY, &folder_id.to_string())
            .await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
