//! Directory allocator.
//!
//! Decides (and physically creates) the directory for the next upload per the
//! configured rotation policy, and performs quota rollover for the
//! rotate-by-space and random policies. Directory creation is capability
//! checked: every segment must live under an allow-listed root, and both the
//! create and the marker write fail closed for the whole batch.
//!
//! Selection is sticky through the persisted current-folder pointer, so
//! repeated calls with no intervening commit return the same folder. Random
//! policies pick a fresh shard only on rollover or policy change.
//!
//! No lock guards concurrent rotation: two uploads racing a quota boundary
//! may each rotate. The race is benign (an extra registered directory, no
//! data loss).

use chrono::{Datelike, Utc};
use palaver_core::models::DirUsage;
use palaver_core::{AppError, AttachmentConfig, DirectoryPolicy};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::registry::{write_marker, DirectoryRegistry};

/// Settings key recording which policy allocated the current pointer.
const POLICY_KEY: &str = "current_folder_policy";

#[derive(Clone)]
pub struct DirectoryAllocator {
    registry: DirectoryRegistry,
    config: Arc<AttachmentConfig>,
}

impl DirectoryAllocator {
    pub fn new(registry: DirectoryRegistry, config: Arc<AttachmentConfig>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    /// Pick the folder that will receive the next upload, creating and
    /// registering it if the policy demands a directory that does not exist
    /// yet. Stable across calls with no intervening commit.
    #[tracing::instrument(skip(self))]
    pub async fn select_directory_for_next_upload(&self) -> Result<i64, AppError> {
        self.registry.ensure_default().await?;
        let current_id = self.registry.current_folder().await?;
        let current_path = self.registry.path_of(current_id).await?;
        let base = self.base_directory()?;

        let now = Utc::now();
        let candidate = match self.config.policy {
            DirectoryPolicy::Fixed => Some(base.clone()),
            // Rotation happens only on quota rollover.
            DirectoryPolicy::RotateBySpace => None,
            DirectoryPolicy::Yearly => Some(base.join(now.year().to_string())),
            DirectoryPolicy::Monthly => Some(
                base.join(now.year().to_string())
                    .join(format!("{:02}", now.month())),
            ),
            DirectoryPolicy::RandomFlat | DirectoryPolicy::RandomNested => {
                let recorded = self.registry.repo().get_setting(POLICY_KEY).await?;
                if recorded == Some(self.config.policy.to_string()) {
                    None
                } else {
                    Some(self.random_candidate(&base))
                }
            }
        };

        match candidate {
            None => Ok(current_id),
            Some(path) if path == current_path => Ok(current_id),
            Some(path) => self.activate(&path).await,
        }
    }

    /// Quota rollover: when the active directory exceeded its limits under a
    /// rotatable policy, allocate the next directory and move the staged
    /// files (e.g. the just-written temp object and its thumbnail) into it.
    /// Returns the new folder id and the relocated paths, in input order, or
    /// None when the policy does not rotate.
    #[tracing::instrument(skip(self, staged))]
    pub async fn rotate_if_full(
        &self,
        folder_id: i64,
        staged: &[PathBuf],
    ) -> Result<Option<(i64, Vec<PathBuf>)>, AppError> {
        if !self.can_rotate() {
            return Ok(None);
        }
        let usage = self.registry.usage(folder_id).await?;
        if !self.exceeds(usage) {
            return Ok(None);
        }

        let base = self.base_directory()?;
        let current_path = self.registry.path_of(folder_id).await?;
        let next = match self.config.policy {
            DirectoryPolicy::RotateBySpace => {
                let registered = self.registry.all().await?;
                let suffix = next_rotation_suffix(
                    registered.iter().map(|e| e.path.as_str()),
                    &base,
                );
                base.join(format!("attachments_{}", suffix))
            }
            _ => {
                // Random policies roll over to a fresh shard.
                let mut candidate = self.random_candidate(&base);
                for _ in 0..8 {
                    if candidate != current_path {
                        break;
                    }
                    candidate = self.random_candidate(&base);
                }
                candidate
            }
        };

        let new_id = self.activate(&next).await?;
        let mut moved = Vec::with_capacity(staged.len());
        for path in staged {
            let name = path
                .file_name()
                .ok_or_else(|| AppError::InvalidInput(format!("bad staged path: {}", path.display())))?;
            let target = next.join(name);
            fs::rename(path, &target).await?;
            moved.push(target);
        }
        tracing::info!(
            old_folder = folder_id,
            new_folder = new_id,
            moved = moved.len(),
            "rotated attachment directory"
        );
        Ok(Some((new_id, moved)))
    }

    /// Whether recorded usage breaks the configured directory quota.
    pub fn exceeds(&self, usage: DirUsage) -> bool {
        (self.config.dir_size_limit > 0 && usage.bytes > self.config.dir_size_limit)
            || (self.config.dir_file_limit > 0 && usage.files > self.config.dir_file_limit)
    }

    /// Whether usage crossed the near-limit warning threshold.
    pub fn near_limit(&self, usage: DirUsage) -> bool {
        self.config.dir_size_limit > 0
            && self.config.space_warning_margin > 0
            && usage.bytes
                > self
                    .config
                    .dir_size_limit
                    .saturating_sub(self.config.space_warning_margin)
    }

    pub fn can_rotate(&self) -> bool {
        matches!(
            self.config.policy,
            DirectoryPolicy::RotateBySpace
                | DirectoryPolicy::RandomFlat
                | DirectoryPolicy::RandomNested
        )
    }

    fn base_directory(&self) -> Result<PathBuf, AppError> {
        self.config
            .base_directories
            .first()
            .cloned()
            .ok_or_else(|| AppError::InvalidInput("no base directories configured".into()))
    }

    fn random_candidate(&self, base: &Path) -> PathBuf {
        let mut rng = rand::rng();
        match self.config.policy {
            DirectoryPolicy::RandomNested => {
                let a: u32 = rng.random_range(0..16);
                let b: u32 = rng.random_range(0..16);
                base.join(format!("{:x}", a)).join(format!("{:x}", b))
            }
            _ => {
                let n: u32 = rng.random_range(0..16);
                base.join(format!("random_{:x}", n))
            }
        }
    }

    /// Register `path` (creating it if needed), point the registry at it,
    /// and record the allocating policy.
    async fn activate(&self, path: &Path) -> Result<i64, AppError> {
        let repo = self.registry.repo();
        let path_str = path.to_string_lossy().to_string();
        let folder_id = match repo.by_path(&path_str).await? {
            Some(entry) => entry.folder_id,
            None => {
                self.create_directory(path).await?;
                let id = repo.register(&path_str).await?;
                tracing::info!(folder_id = id, path = %path.display(), "registered attachment directory");
                id
            }
        };
        repo.set_current(folder_id).await?;
        repo.set_setting(POLICY_KEY, &self.config.policy.to_string())
            .await?;
        Ok(folder_id)
    }

    /// Create `path` component by component. Every segment is checked
    /// against the allow-listed roots before creation; restricted roots fail
    /// closed and abort the whole batch.
    async fn create_directory(&self, path: &Path) -> Result<(), AppError> {
        let base = self
            .config
            .base_directories
            .iter()
            .find(|b| path.starts_with(b))
            .ok_or_else(|| AppError::RestrictedRoot(path.display().to_string()))?;

        let mut cursor = base.clone();
        let remainder = path
            .strip_prefix(base)
            .map_err(|_| AppError::RestrictedRoot(path.display().to_string()))?;

        if !fs::try_exists(&cursor).await? {
            fs::create_dir_all(&cursor).await.map_err(|e| {
                AppError::DirectoryNotCreatable(format!("{}: {}", cursor.display(), e))
            })?;
        }
        for component in remainder.components() {
            cursor.push(component);
            if !fs::try_exists(&cursor).await? {
                fs::create_dir(&cursor).await.map_err(|e| {
                    AppError::DirectoryNotCreatable(format!("{}: {}", cursor.display(), e))
                })?;
            }
        }
        write_marker(path).await
    }
}

/// Next `attachments_{n}` suffix given the already-registered paths.
fn next_rotation_suffix<'a>(registered: impl Iterator<Item = &'a str>, base: &Path) -> u32 {
    let mut max = 0;
    for path in registered {
        let path = Path::new(path);
        if path.parent() != Some(base) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(n) = name
                .strip_prefix("attachments_")
                .and_then(|s| s.parse::<u32>().ok())
            {
                max = max.max(n);
            }
        }
    }
    max + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_suffix_scans_registered_siblings() {
        let base = Path::new("/srv/att");
        let registered = [
            "/srv/att",
            "/srv/att/attachments_1",
            "/srv/att/attachments_3",
            "/srv/other/attachments_9",
        ];
        assert_eq!(
            next_rotation_suffix(registered.iter().copied(), base),
            4
        );
    }

    #[test]
    fn rotation_suffix_starts_at_one() {
        let base = Path::new("/srv/att");
        assert_eq!(next_rotation_suffix(["/srv/att"].iter().copied(), base), 1);
    }
}
