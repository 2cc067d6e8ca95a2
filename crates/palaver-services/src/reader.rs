//! Batch read path: attachments for a set of messages, with display
//! geometry and lazy thumbnail regeneration.

use crate::store::AttachmentStore;
use async_trait::async_trait;
use palaver_core::models::Attachment;
use palaver_core::{AppError, AttachmentConfig};
use palaver_db::AttachmentRepository;
use palaver_processing::svg;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

/// Board-visibility hook, re-checked after a lazy regeneration since that
/// step can reveal a different owning board.
#[async_trait]
pub trait VisibilityGate: Send + Sync {
    async fn can_view(&self, attachment: &Attachment) -> bool;
}

/// Gate that admits everything; the default for single-board hosts.
pub struct AllowAll;

#[async_trait]
impl VisibilityGate for AllowAll {
    async fn can_view(&self, _attachment: &Attachment) -> bool {
        true
    }
}

/// Dimensions of a linked thumbnail row, enough for the caller's markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbInfo {
    pub id: i64,
    pub width: i64,
    pub height: i64,
}

/// One attachment prepared for inline display.
#[derive(Debug, Clone)]
pub struct AttachmentDisplay {
    pub attachment: Attachment,
    pub thumbnail: Option<ThumbInfo>,
    pub display_width: i64,
    pub display_height: i64,
    /// A thumbnail shows inline but the original still exceeds the
    /// display maximums, so the client offers the full image on click.
    pub expand_on_click: bool,
}

pub struct AttachmentReader {
    config: Arc<AttachmentConfig>,
    attachments: AttachmentRepository,
    store: AttachmentStore,
    loaded: HashMap<i64, Vec<AttachmentDisplay>>,
}

impl AttachmentReader {
    pub fn new(pool: SqlitePool, config: Arc<AttachmentConfig>) -> Self {
        Self {
            attachments: AttachmentRepository::new(pool.clone()),
            store: AttachmentStore::new(pool, config.clone()),
            config,
            loaded: HashMap::new(),
        }
    }

    /// Load displayable attachments for `message_ids`, keyed by message.
    /// Idempotent per request: message ids already loaded through this
    /// reader are served from the cache without re-querying.
    #[tracing::instrument(skip(self, gate), fields(messages = message_ids.len()))]
    pub async fn load_for_messages(
        &mut self,
        message_ids: &[i64],
        gate: &dyn VisibilityGate,
    ) -> Result<HashMap<i64, Vec<AttachmentDisplay>>, AppError> {
        let fresh: Vec<i64> = message_ids
            .iter()
            .copied()
            .filter(|id| !self.loaded.contains_key(id))
            .collect();

        if !fresh.is_empty() {
            let rows = self.attachments.for_messages(&fresh).await?;
            let thumb_ids: Vec<i64> = rows.iter().filter_map(|r| r.thumbnail_id).collect();
            let mut thumbs: HashMap<i64, Attachment> = self
                .attachments
                .get_many(&thumb_ids)
                .await?
                .into_iter()
                .map(|t| (t.id, t))
                .collect();

            // Every fresh id gets an entry, empty or not, so a message
            // without attachments is not re-queried next call.
            for id in &fresh {
                self.loaded.entry(*id).or_default();
            }
            for row in rows {
                if !gate.can_view(&row).await {
                    continue;
                }
                let Some(message_id) = row.message_id else {
                    continue;
                };
                let display = self.prepare(row, &mut thumbs, gate).await?;
                if let Some(display) = display {
                    self.loaded.entry(message_id).or_default().push(display);
                }
            }
        }

        Ok(message_ids
            .iter()
            .filter_map(|id| self.loaded.get(id).map(|v| (*id, v.clone())))
            .collect())
    }

    async fn prepare(
        &self,
        mut row: Attachment,
        thumbs: &mut HashMap<i64, Attachment>,
        gate: &dyn VisibilityGate,
    ) -> Result<Option<AttachmentDisplay>, AppError> {
        // SVG dimensions are never persisted; probe the file each time.
        if row.mime_type == "image/svg+xml" && !row.is_image() {
            if let Ok(data) = fs::read(self.path_of(&row).await?).await {
                if let Some((w, h)) = svg::dimensions(&data) {
                    row.width = w as i64;
                    row.height = h as i64;
                }
            }
        }

        if row.thumbnail_id.is_none() && self.store.needs_thumbnail(&row) {
            let data = fs::read(self.path_of(&row).await?).await?;
            if let Some(thumb) = self.store.derive_thumbnail(&row, &data).await? {
                row.thumbnail_id = Some(thumb.id);
                thumbs.insert(thumb.id, thumb);
                // Regeneration can land in a rotated directory tied to a
                // different board context; the gate gets a second look.
                if !gate.can_view(&row).await {
                    return Ok(None);
                }
            }
        }

        let thumbnail = row.thumbnail_id.and_then(|id| thumbs.get(&id)).map(|t| {
            ThumbInfo {
                id: t.id,
                width: t.width,
                height: t.height,
            }
        });

        // A zero maximum means unbounded.
        let max_w = match self.config.max_width as i64 {
            0 => i64::MAX,
            v => v,
        };
        let max_h = match self.config.max_height as i64 {
            0 => i64::MAX,
            v => v,
        };
        let oversized = row.is_image() && (row.width > max_w || row.height > max_h);
        let (display_width, display_height, expand_on_click) = match (&thumbnail, oversized) {
            (None, true) => {
                let (w, h) = fit_within(row.width, row.height, max_w, max_h);
                (w, h, false)
            }
            (Some(_), true) => (row.width, row.height, true),
            _ => (row.width, row.height, false),
        };

        Ok(Some(AttachmentDisplay {
            attachment: row,
            thumbnail,
            display_width,
            display_height,
            expand_on_click,
        }))
    }

    async fn path_of(&self, row: &Attachment) -> Result<PathBuf, AppError> {
        if row.kind == palaver_core::models::AttachmentKind::Avatar {
            Ok(self.config.avatar_directory.join(&row.filename))
        } else {
            Ok(self
                .store
                .registry()
                .path_of(row.folder_id)
                .await?
                .join(row.disk_name()))
        }
    }
}

/// Proportional downscale to fit inside `max_w` x `max_h`.
fn fit_within(width: i64, height: i64, max_w: i64, max_h: i64) -> (i64, i64) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
    (
        ((width as f64 * scale) as i64).max(1),
        ((height as f64 * scale) as i64).max(1),
    )
}
