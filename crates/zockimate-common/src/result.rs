//! Structured per-name results returned by the engines. The batch driver
//! aggregates these into an `{updated, skipped, failed}` summary.

use serde::Serialize;

use crate::image::ImageReference;

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub needs_update: bool,
    pub current_image: ImageReference,
    pub update_image: ImageReference,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateResult {
    pub container_name: String,
    pub success: bool,
    pub needs_update: bool,
    /// True when the failure path invoked the compensating rollback.
    pub rollback_needed: bool,
    /// Id of the pre-update snapshot, when one was captured.
    pub snapshot_id: i64,
    pub old_image: Option<ImageReference>,
    pub new_image: Option<ImageReference>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackResult {
    pub container_name: String,
    pub success: bool,
    /// Snapshot that was restored.
    pub snapshot_id: i64,
    /// Safety snapshot captured before mutating, for recovery.
    pub safety_snapshot_id: i64,
    pub image_rollback: bool,
    pub data_rollback: bool,
    pub config_rollback: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenameResult {
    pub old_name: String,
    pub new_name: String,
    pub success: bool,
    pub engine_renamed: bool,
    pub entries_renamed: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveResult {
    pub container_name: String,
    pub success: bool,
    pub container_removed: bool,
    pub entries_deleted: u64,
    pub error: Option<String>,
}

/// Outcome counts for one batch invocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record_update(&mut self, result: &UpdateResult) {
        if !result.success {
            self.failed += 1;
        } else if result.needs_update {
            self.updated += 1;
        } else {
            self.skipped += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
