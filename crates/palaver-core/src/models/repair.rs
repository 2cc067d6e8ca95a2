//! Resumable integrity-sweep state.
//!
//! The host grants a bounded slice of wall-clock time per request, so the
//! sweep is an explicit step machine: the caller serializes `RepairProgress`
//! into its session store, re-invokes `advance` on the next request, and
//! simply stops issuing continuations to cancel. Committed progress is never
//! rolled back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The six ordered phases of the sweep. Ordering matters: orphan thumbnails
/// are removed before dangling references are nulled so a reference is not
/// cleared for a thumbnail about to disappear anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPhase {
    OrphanThumbnails,
    DanglingThumbnailRefs,
    FileReconciliation,
    AvatarsWithoutMember,
    AttachmentsWithoutMessage,
    DirectorySweep,
}

impl RepairPhase {
    pub fn next(self) -> Option<RepairPhase> {
        match self {
            RepairPhase::OrphanThumbnails => Some(RepairPhase::DanglingThumbnailRefs),
            RepairPhase::DanglingThumbnailRefs => Some(RepairPhase::FileReconciliation),
            RepairPhase::FileReconciliation => Some(RepairPhase::AvatarsWithoutMember),
            RepairPhase::AvatarsWithoutMember => Some(RepairPhase::AttachmentsWithoutMessage),
            RepairPhase::AttachmentsWithoutMessage => Some(RepairPhase::DirectorySweep),
            RepairPhase::DirectorySweep => None,
        }
    }
}

/// Categories of findings; membership in `RepairProgress::fix` opts a
/// category into mutation. Default is report-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairIssue {
    OrphanThumbnail,
    DanglingThumbnailRef,
    WrongFolder,
    FileMissing,
    ZeroByteFile,
    FileWrongSize,
    AvatarNoMember,
    AttachmentNoMessage,
    WildFile,
}

/// Per-category counters, accumulated even when nothing is fixed so a full
/// dry-run pass reports the same totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairCounts {
    pub orphan_thumbnails: i64,
    pub dangling_thumbnail_refs: i64,
    pub wrong_folder: i64,
    pub files_missing: i64,
    pub zero_byte_files: i64,
    pub wrong_size: i64,
    pub avatars_no_member: i64,
    pub attachments_no_message: i64,
    pub wild_files: i64,
    pub stale_temp_files: i64,
}

/// Cross-request sweep cursor. Created at phase 0, advanced each invocation,
/// cleared by the caller once `advance` reports `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairProgress {
    pub phase: RepairPhase,
    /// Id-range cursor (or directory index during the final sweep).
    pub cursor: i64,
    /// Categories the operator opted into auto-fixing.
    pub fix: BTreeSet<RepairIssue>,
    pub counts: RepairCounts,
}

impl RepairProgress {
    /// A fresh dry-run sweep.
    pub fn new() -> Self {
        Self::with_fixes(BTreeSet::new())
    }

    pub fn with_fixes(fix: BTreeSet<RepairIssue>) -> Self {
        Self {
            phase: RepairPhase::OrphanThumbnails,
            cursor: 0,
            fix,
            counts: RepairCounts::default(),
        }
    }

    pub fn fixing(&self, issue: RepairIssue) -> bool {
        self.fix.contains(&issue)
    }
}

impl Default for RepairProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal report of a completed sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub counts: RepairCounts,
    pub fixed: BTreeSet<RepairIssue>,
}

/// Result of one bounded `advance` call.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// Time budget exhausted; re-invoke with the returned progress.
    More(RepairProgress),
    Done(RepairSummary),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order_and_terminate() {
        let mut phase = RepairPhase::OrphanThumbnails;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(phase, RepairPhase::DirectorySweep);
    }

    #[test]
    fn progress_round_trips_through_serde() {
        let mut fix = BTreeSet::new();
        fix.insert(RepairIssue::FileWrongSize);
        let mut progress = RepairProgress::with_fixes(fix);
        progress.phase = RepairPhase::FileReconciliation;
        progress.cursor = 1500;
        progress.counts.wrong_size = 3;

        let json = serde_json::to_string(&progress).unwrap();
        let restored: RepairProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.phase, RepairPhase::FileReconciliation);
        assert_eq!(restored.cursor, 1500);
        assert_eq!(restored.counts, progress.counts);
        assert!(restored.fixing(RepairIssue::FileWrongSize));
    }
}
