use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Attachment kind discriminant.
///
/// The integer values are persisted; 2 was a retired kind in the legacy
/// schema and stays reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Normal = 0,
    Avatar = 1,
    Thumbnail = 3,
}

/// A stored binary object: upload, avatar, or derived thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: i64,
    pub folder_id: i64,
    /// Owning message; None for avatars and not-yet-attached rows.
    pub message_id: Option<i64>,
    /// Owning member; Some(>0) for avatars.
    pub member_id: Option<i64>,
    /// Original client filename, sanitized. Avatars are stored on disk under
    /// this exact name; everything else under `<id>_<content_hash>`.
    pub filename: String,
    /// Lowercase sha256 hex of the content. Empty for avatars.
    pub content_hash: String,
    /// Lowercase extension without the dot.
    pub extension: String,
    pub size_bytes: i64,
    /// 0 for non-images.
    pub width: i64,
    pub height: i64,
    pub mime_type: String,
    pub kind: AttachmentKind,
    /// Forward-only link to a kind=thumbnail row. Never set on thumbnails.
    pub thumbnail_id: Option<i64>,
    pub approved: bool,
    pub downloads: i64,
}

impl Attachment {
    /// Disk filename under the owning folder. Avatars keep their original
    /// name; everything else uses the `<id>_<hash>` convention.
    pub fn disk_name(&self) -> String {
        match self.kind {
            AttachmentKind::Avatar => self.filename.clone(),
            _ => format!("{}_{}", self.id, self.content_hash),
        }
    }

    pub fn is_image(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Column values for a row about to be inserted; the id comes back from the
/// metadata store's atomic insert.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub folder_id: i64,
    pub message_id: Option<i64>,
    pub member_id: Option<i64>,
    pub filename: String,
    pub content_hash: String,
    pub extension: String,
    pub size_bytes: i64,
    pub width: i64,
    pub height: i64,
    pub mime_type: String,
    pub kind: AttachmentKind,
    pub approved: bool,
}
