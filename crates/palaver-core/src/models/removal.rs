//! Deletion filters and audit actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A single removal predicate. A removal request is a conjunction over a
/// slice of these; `Not` negates its inner predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemovalFilter {
    /// Attachment ids.
    Ids(Vec<i64>),
    /// Owning member ids.
    Members(Vec<i64>),
    /// Owning message ids.
    Messages(Vec<i64>),
    /// kind = normal only (excludes avatars and thumbnails).
    NormalOnly,
    /// Owning message posted before the instant.
    PostedBefore(DateTime<Utc>),
    /// Owning member last logged in before the instant.
    LastLoginBefore(DateTime<Utc>),
    /// Strictly larger than the byte threshold.
    LargerThan(i64),
    Not(Box<RemovalFilter>),
}

/// Action code written to the append-only audit log per deleted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RemoveAttachment,
    RemoveAvatar,
    RepairDelete,
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuditAction::RemoveAttachment => write!(f, "remove_attachment"),
            AuditAction::RemoveAvatar => write!(f, "remove_avatar"),
            AuditAction::RepairDelete => write!(f, "repair_delete"),
        }
    }
}
