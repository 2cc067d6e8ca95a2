//! Naming conventions and filename hygiene.

use std::path::Path;
use uuid::Uuid;

/// Prefix of staged (not yet committed) upload files.
pub const TEMP_PREFIX: &str = "post_tmp_";

/// Deny-all access marker written into every registered directory.
pub const ACCESS_MARKER: &str = ".htaccess";
pub const ACCESS_MARKER_BODY: &str = "Order Deny,Allow\nDeny from all\n";

/// Unguessable temporary name for a staged upload.
pub fn temp_name(temp_id: Uuid) -> String {
    format!("{}{}", TEMP_PREFIX, temp_id.simple())
}

/// Final on-disk name for a committed non-avatar object.
pub fn final_name(id: i64, content_hash: &str) -> String {
    format!("{}_{}", id, content_hash)
}

/// Parse a directory entry back into `(id, hash)`; None for anything that
/// does not follow the final-name convention.
pub fn parse_final_name(name: &str) -> Option<(i64, &str)> {
    let (id, hash) = name.split_once('_')?;
    let id: i64 = id.parse().ok()?;
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((id, hash))
}

pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Files the registry writes itself and the sweep must never flag.
pub fn is_marker(name: &str) -> bool {
    name == ACCESS_MARKER || name == "index.html"
}

/// Reduce a client filename to a safe basename: path components stripped,
/// hostile characters replaced, length capped.
pub fn sanitize_filename(filename: &str) -> String {
    const MAX: usize = 255;
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);
    if base.contains("..") {
        return "invalid_filename".to_string();
    }
    let s: String = base
        .chars()
        .take(MAX)
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.trim_matches(['_', '.']).is_empty() {
        "file".to_string()
    } else {
        s
    }
}

/// Lowercase extension without the dot; empty when absent.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}
