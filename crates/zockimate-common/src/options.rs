//! Option structs for the engine operations, with the shared timeout
//! constants. Callers build these with struct-update syntax over `Default`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{Result, ZockimateError};

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);
pub const MIN_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_OPERATION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Check even when the current image is not exactly pinned.
    pub force: bool,
    /// Remove the freshly pulled image again when an update was detected.
    pub cleanup: bool,
    /// Send a notification when an update is available.
    pub notify: bool,
    /// Bounds the pull portion of the check.
    pub timeout: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            force: false,
            cleanup: true,
            notify: false,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Recreate even when no newer image exists.
    pub force: bool,
    pub dry_run: bool,
    pub notify: bool,
    /// Default readiness wait, overridable per container by label.
    pub timeout: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            notify: false,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl UpdateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_OPERATION_TIMEOUT {
            return Err(ZockimateError::Config(format!(
                "timeout too short (minimum {}s)",
                MIN_OPERATION_TIMEOUT.as_secs()
            )));
        }
        if self.timeout > MAX_OPERATION_TIMEOUT {
            return Err(ZockimateError::Config(format!(
                "timeout too long (maximum {}s)",
                MAX_OPERATION_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

/// Which aspects of a snapshot to restore.
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Snapshot to restore, 0 meaning the most recent.
    pub snapshot_id: i64,
    pub image: bool,
    pub data: bool,
    pub config: bool,
    /// Allow an image rollback without an exact reference, and skip the
    /// management/running guards (set on compensating rollbacks).
    pub force: bool,
    pub notify: bool,
    pub timeout: Duration,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            snapshot_id: 0,
            image: false,
            data: false,
            config: false,
            force: false,
            notify: false,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl RollbackOptions {
    /// Full forced restore of every aspect, as used by compensation paths.
    pub fn recovery(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            image: true,
            data: true,
            config: true,
            force: true,
            notify: false,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub message: String,
    pub dry_run: bool,
    /// Snapshot a stopped container anyway.
    pub force: bool,
    /// Skip the retention sweep; set on pre-update and safety snapshots so
    /// a sweep can never delete the snapshot the running operation uses.
    pub no_cleanup: bool,
}

impl SnapshotOptions {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Date,
    Container,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub containers: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Substring search over message and status.
    pub search: String,
    pub sort_by: SortBy,
    /// Keep only the newest entry per container.
    pub last: bool,
    /// 0 means unlimited.
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove entries even though the engine container still exists.
    pub force: bool,
    /// Also stop and remove the engine container.
    pub with_container: bool,
    pub older_than: Option<Duration>,
    pub before: Option<DateTime<Utc>>,
    pub all: bool,
    pub dry_run: bool,
    /// Also destroy the dataset snapshots of the deleted rows.
    pub zfs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenameOptions {
    /// Only rewrite store rows, leave the engine container alone.
    pub db_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_timeout_window_is_enforced() {
        let ok = UpdateOptions::default();
        assert!(ok.validate().is_ok());

        let short = UpdateOptions {
            timeout: Duration::from_secs(29),
            ..Default::default()
        };
        assert!(short.validate().is_err());

        let long = UpdateOptions {
            timeout: Duration::from_secs(24 * 3600 + 1),
            ..Default::default()
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn recovery_options_force_every_aspect() {
        let opts = RollbackOptions::recovery(42);
        assert_eq!(opts.snapshot_id, 42);
        assert!(opts.image && opts.data && opts.config && opts.force);
        assert!(!opts.notify);
    }
}
