use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One registered physical directory eligible to hold attachment files.
///
/// Size and file count are recomputed from disk on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DirectoryEntry {
    pub folder_id: i64,
    pub path: String,
}

/// Recomputed on-disk usage of a registered directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirUsage {
    pub bytes: u64,
    pub files: u64,
}
