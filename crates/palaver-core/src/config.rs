//! Configuration module
//!
//! Explicit configuration value object for the attachment store. Components
//! receive an `AttachmentConfig` (usually behind an `Arc`) instead of reading
//! ambient globals; the only mutable persisted state is the directory
//! registry, which lives in the database.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Defaults, in bytes unless noted.
const DEFAULT_DIR_SIZE_LIMIT: u64 = 100 * 1024 * 1024;
const DEFAULT_DIR_FILE_LIMIT: u64 = 1000;
const DEFAULT_SPACE_WARNING_MARGIN: u64 = 10 * 1024 * 1024;
const DEFAULT_ATTACHMENT_SIZE_LIMIT: u64 = 2 * 1024 * 1024;
const DEFAULT_POST_TOTAL_SIZE_LIMIT: u64 = 8 * 1024 * 1024;
/// Hard ceiling applied when the per-post file count is unset.
pub const DEFAULT_POST_COUNT_LIMIT: u32 = 50;
const DEFAULT_THUMB_WIDTH: u32 = 320;
const DEFAULT_THUMB_HEIGHT: u32 = 240;
const DEFAULT_SCAN_SLICE_SECS: u64 = 3;
const DEFAULT_SCAN_RANGE: i64 = 250;
const DEFAULT_TEMP_MAX_AGE_SECS: u64 = 12 * 3600;

/// Strategy for picking/creating the directory that receives the next upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryPolicy {
    /// Single fixed directory.
    Fixed,
    /// `attachments_{n}`; n increments when the active directory fills up.
    RotateBySpace,
    /// One subdirectory per year.
    Yearly,
    /// One subdirectory per year/month.
    Monthly,
    /// One of 16 `random_{x}` subdirectories under the active base.
    RandomFlat,
    /// Two nested hex levels, 16x16 directories.
    RandomNested,
}

impl std::fmt::Display for DirectoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            DirectoryPolicy::Fixed => "fixed",
            DirectoryPolicy::RotateBySpace => "rotate_by_space",
            DirectoryPolicy::Yearly => "yearly",
            DirectoryPolicy::Monthly => "monthly",
            DirectoryPolicy::RandomFlat => "random_flat",
            DirectoryPolicy::RandomNested => "random_nested",
        };
        write!(f, "{}", tag)
    }
}

impl FromStr for DirectoryPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(DirectoryPolicy::Fixed),
            "rotate_by_space" => Ok(DirectoryPolicy::RotateBySpace),
            "yearly" => Ok(DirectoryPolicy::Yearly),
            "monthly" => Ok(DirectoryPolicy::Monthly),
            "random_flat" => Ok(DirectoryPolicy::RandomFlat),
            "random_nested" => Ok(DirectoryPolicy::RandomNested),
            _ => Err(anyhow::anyhow!("Invalid directory policy: {}", s)),
        }
    }
}

/// Attachment store configuration.
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    /// Allow-listed roots; every created directory must live under one of
    /// these. The first entry seeds folder 1.
    pub base_directories: Vec<PathBuf>,
    /// Fixed directory for avatar-kind rows (legacy naming scheme, never
    /// sharded through the registry).
    pub avatar_directory: PathBuf,
    pub policy: DirectoryPolicy,
    /// Active-directory size quota in bytes (0 = unlimited).
    pub dir_size_limit: u64,
    /// Active-directory file-count quota (0 = unlimited).
    pub dir_file_limit: u64,
    /// Crossing `dir_size_limit - margin` triggers a one-time admin warning.
    pub space_warning_margin: u64,
    /// Per-file size limit in bytes (0 = unlimited).
    pub attachment_size_limit: u64,
    /// Cumulative per-post size limit in bytes (0 = unlimited).
    pub post_total_size_limit: u64,
    /// Per-post file-count limit; 0 means unset and falls back to
    /// [`DEFAULT_POST_COUNT_LIMIT`].
    pub post_count_limit: u32,
    pub check_extensions: bool,
    pub allowed_extensions: Vec<String>,
    pub thumbnails_enabled: bool,
    pub thumb_width: u32,
    pub thumb_height: u32,
    /// Maximum inline display dimensions (0 = unlimited).
    pub max_width: u32,
    pub max_height: u32,
    /// Attempt a lossless re-encode instead of rejecting images that fail
    /// the embedded-payload check.
    pub reencode_unsafe_images: bool,
    /// New attachments enter the moderation queue instead of being approved.
    pub require_approval: bool,
    /// Age past which stale temp files become eligible for deletion.
    pub temp_max_age: Duration,
    /// Soft wall-clock budget for one integrity-scan slice.
    pub scan_slice: Duration,
    /// Number of ids covered per scanner chunk between cursor checkpoints.
    pub scan_range: i64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            base_directories: vec![PathBuf::from("attachments")],
            avatar_directory: PathBuf::from("avatars"),
            policy: DirectoryPolicy::Fixed,
            dir_size_limit: DEFAULT_DIR_SIZE_LIMIT,
            dir_file_limit: DEFAULT_DIR_FILE_LIMIT,
            space_warning_margin: DEFAULT_SPACE_WARNING_MARGIN,
            attachment_size_limit: DEFAULT_ATTACHMENT_SIZE_LIMIT,
            post_total_size_limit: DEFAULT_POST_TOTAL_SIZE_LIMIT,
            post_count_limit: 0,
            check_extensions: false,
            allowed_extensions: vec![
                "jpg".into(),
                "jpeg".into(),
                "png".into(),
                "gif".into(),
                "webp".into(),
                "svg".into(),
                "pdf".into(),
                "txt".into(),
                "zip".into(),
            ],
            thumbnails_enabled: true,
            thumb_width: DEFAULT_THUMB_WIDTH,
            thumb_height: DEFAULT_THUMB_HEIGHT,
            max_width: 0,
            max_height: 0,
            reencode_unsafe_images: false,
            require_approval: false,
            temp_max_age: Duration::from_secs(DEFAULT_TEMP_MAX_AGE_SECS),
            scan_slice: Duration::from_secs(DEFAULT_SCAN_SLICE_SECS),
            scan_range: DEFAULT_SCAN_RANGE,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AttachmentConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_directories = env::var("PALAVER_BASE_DIRECTORIES")
            .map(|v| v.split(',').map(PathBuf::from).collect())
            .unwrap_or(defaults.base_directories);

        let allowed_extensions = env::var("PALAVER_ALLOWED_EXTENSIONS")
            .map(|v| v.split(',').map(|e| e.trim().to_lowercase()).collect())
            .unwrap_or(defaults.allowed_extensions);

        Self {
            base_directories,
            avatar_directory: env::var("PALAVER_AVATAR_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.avatar_directory),
            policy: env::var("PALAVER_DIRECTORY_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.policy),
            dir_size_limit: env_parse("PALAVER_DIR_SIZE_LIMIT", defaults.dir_size_limit),
            dir_file_limit: env_parse("PALAVER_DIR_FILE_LIMIT", defaults.dir_file_limit),
            space_warning_margin: env_parse(
                "PALAVER_SPACE_WARNING_MARGIN",
                defaults.space_warning_margin,
            ),
            attachment_size_limit: env_parse(
                "PALAVER_ATTACHMENT_SIZE_LIMIT",
                defaults.attachment_size_limit,
            ),
            post_total_size_limit: env_parse(
                "PALAVER_POST_TOTAL_SIZE_LIMIT",
                defaults.post_total_size_limit,
            ),
            post_count_limit: env_parse("PALAVER_POST_COUNT_LIMIT", defaults.post_count_limit),
            check_extensions: env_parse("PALAVER_CHECK_EXTENSIONS", defaults.check_extensions),
            allowed_extensions,
            thumbnails_enabled: env_parse("PALAVER_THUMBNAILS_ENABLED", defaults.thumbnails_enabled),
            thumb_width: env_parse("PALAVER_THUMB_WIDTH", defaults.thumb_width),
            thumb_height: env_parse("PALAVER_THUMB_HEIGHT", defaults.thumb_height),
            max_width: env_parse("PALAVER_MAX_WIDTH", defaults.max_width),
            max_height: env_parse("PALAVER_MAX_HEIGHT", defaults.max_height),
            reencode_unsafe_images: env_parse(
                "PALAVER_REENCODE_UNSAFE_IMAGES",
                defaults.reencode_unsafe_images,
            ),
            require_approval: env_parse("PALAVER_REQUIRE_APPROVAL", defaults.require_approval),
            temp_max_age: Duration::from_secs(env_parse(
                "PALAVER_TEMP_MAX_AGE_SECS",
                defaults.temp_max_age.as_secs(),
            )),
            scan_slice: Duration::from_secs(env_parse(
                "PALAVER_SCAN_SLICE_SECS",
                defaults.scan_slice.as_secs(),
            )),
            scan_range: env_parse("PALAVER_SCAN_RANGE", defaults.scan_range),
        }
    }

    /// Effective per-post file-count ceiling (default applies when unset).
    pub fn effective_post_count_limit(&self) -> u32 {
        if self.post_count_limit == 0 {
            DEFAULT_POST_COUNT_LIMIT
        } else {
            self.post_count_limit
        }
    }
}
