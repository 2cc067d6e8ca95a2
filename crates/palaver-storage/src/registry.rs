//! Directory registry service.
//!
//! Wraps the persisted folder_id→path map. Folder 1 always exists and
//! defaults to the first configured base directory; on-disk usage is
//! recomputed by walking the directory, never persisted.

use palaver_core::models::{DirUsage, DirectoryEntry};
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::DirectoryRepository;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::paths;

#[derive(Clone)]
pub struct DirectoryRegistry {
    repo: DirectoryRepository,
    config: Arc<AttachmentConfig>,
}

impl DirectoryRegistry {
    pub fn new(repo: DirectoryRepository, config: Arc<AttachmentConfig>) -> Self {
        Self { repo, config }
    }

    pub fn repo(&self) -> &DirectoryRepository {
        &self.repo
    }

    /// Seed folder 1 (the first base directory) and the current pointer if
    /// the registry is empty. Idempotent.
    pub async fn ensure_default(&self) -> Result<(), AppError> {
        if !self.repo.list().await?.is_empty() {
            return Ok(());
        }
        let base = self
            .config
            .base_directories
            .first()
            .ok_or_else(|| AppError::InvalidInput("no base directories configured".into()))?
            .clone();

        fs::create_dir_all(&base)
            .await
            .map_err(|e| AppError::DirectoryNotCreatable(format!("{}: {}", base.display(), e)))?;
        write_marker(&base).await?;

        let folder_id = self.repo.register(&base.to_string_lossy()).await?;
        self.repo.set_current(folder_id).await?;
        tracing::info!(folder_id, path = %base.display(), "seeded default attachment directory");
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<DirectoryEntry>, AppError> {
        self.repo.list().await
    }

    pub async fn path_of(&self, folder_id: i64) -> Result<PathBuf, AppError> {
        self.repo
            .by_id(folder_id)
            .await?
            .map(|e| PathBuf::from(e.path))
            .ok_or_else(|| AppError::NotFound(format!("folder {}", folder_id)))
    }

    /// The active folder. The pointer must index an existing entry; a stale
    /// pointer falls back to folder 1.
    pub async fn current_folder(&self) -> Result<i64, AppError> {
        self.ensure_default().await?;
        let pointer = self.repo.current().await?.unwrap_or(1);
        if self.repo.by_id(pointer).await?.is_some() {
            Ok(pointer)
        } else {
            tracing::warn!(pointer, "current-folder pointer is stale, falling back to folder 1");
            Ok(1)
        }
    }

    /// Recompute on-disk usage of a registered directory, skipping access
    /// markers. Missing directories count as empty.
    pub async fn usage(&self, folder_id: i64) -> Result<DirUsage, AppError> {
        let path = self.path_of(folder_id).await?;
        dir_usage(&path).await
    }
}

pub(crate) async fn dir_usage(path: &Path) -> Result<DirUsage, AppError> {
    let mut usage = DirUsage::default();
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(usage),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if paths::is_marker(&name) {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() {
            usage.bytes += meta.len();
            usage.files += 1;
        }
    }
    Ok(usage)
}

pub(crate) async fn write_marker(dir: &Path) -> Result<(), AppError> {
    fs::write(dir.join(paths::ACCESS_MARKER), paths::ACCESS_MARKER_BODY)
        .await
        .map_err(|e| AppError::DirectoryNotWritable(format!("{}: {}", dir.display(), e)))
}
