//! Dataset snapshots via the `zfs` command-line tool.
//!
//! The operations sit behind a trait so the store and the engines can be
//! exercised with an in-memory fake; the production implementation shells
//! out, one bounded subprocess per operation.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use zockimate_common::{Result, ZockimateError};

const ZFS_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait DatasetSnapshotter: Send + Sync {
    /// Creates a point-in-time snapshot of `dataset`, returning its handle
    /// (`dataset@snapshot_yyyymmdd_HHMMSS`).
    async fn create(&self, dataset: &str) -> Result<String>;

    /// Rolls the dataset back to `handle`, discarding any snapshots taken
    /// after it (`zfs rollback -r` semantics). Destructive.
    async fn rollback(&self, handle: &str) -> Result<()>;

    /// Removes the snapshot.
    async fn destroy(&self, handle: &str) -> Result<()>;
}

pub fn snapshot_handle(dataset: &str, at: chrono::DateTime<Utc>) -> String {
    format!("{}@snapshot_{}", dataset, at.format("%Y%m%d_%H%M%S"))
}

/// Production snapshotter invoking the `zfs` binary.
#[derive(Debug, Default)]
pub struct ZfsSnapshotter;

impl ZfsSnapshotter {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let child = Command::new("zfs")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ZockimateError::Filesystem(format!("failed to spawn zfs: {e}")))?;

        let output = tokio::time::timeout(ZFS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                ZockimateError::Filesystem(format!("zfs {} timed out", args.join(" ")))
            })?
            .map_err(|e| ZockimateError::Filesystem(format!("zfs {} failed: {e}", args[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZockimateError::Filesystem(format!(
                "zfs {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DatasetSnapshotter for ZfsSnapshotter {
    async fn create(&self, dataset: &str) -> Result<String> {
        let handle = snapshot_handle(dataset, Utc::now());
        self.run(&["snapshot", &handle]).await?;
        debug!(%handle, "created zfs snapshot");
        Ok(handle)
    }

    async fn rollback(&self, handle: &str) -> Result<()> {
        self.run(&["rollback", "-r", handle]).await?;
        debug!(%handle, "rolled back to zfs snapshot");
        Ok(())
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        self.run(&["destroy", handle]).await?;
        debug!(%handle, "destroyed zfs snapshot");
        Ok(())
    }
}

/// In-memory snapshotter for tests: tracks live handles and records every
/// rollback/destroy so assertions can observe the call sequence.
#[derive(Debug, Default)]
pub struct MemorySnapshotter {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seq: u64,
    live: HashSet<String>,
    rolled_back: Vec<String>,
    destroyed: Vec<String>,
}

impl MemorySnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn live(&self) -> Vec<String> {
        let mut live: Vec<_> = self.state.lock().await.live.iter().cloned().collect();
        live.sort();
        live
    }

    pub async fn rolled_back(&self) -> Vec<String> {
        self.state.lock().await.rolled_back.clone()
    }

    pub async fn destroyed(&self) -> Vec<String> {
        self.state.lock().await.destroyed.clone()
    }
}

#[async_trait]
impl DatasetSnapshotter for MemorySnapshotter {
    async fn create(&self, dataset: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let handle = format!("{}@snapshot_{:06}", dataset, state.seq);
        state.live.insert(handle.clone());
        Ok(handle)
    }

    async fn rollback(&self, handle: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.live.contains(handle) {
            return Err(ZockimateError::Filesystem(format!(
                "snapshot does not exist: {handle}"
            )));
        }
        state.rolled_back.push(handle.to_string());
        Ok(())
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.live.remove(handle) {
            return Err(ZockimateError::Filesystem(format!(
                "snapshot does not exist: {handle}"
            )));
        }
        state.destroyed.push(handle.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn handle_format_embeds_dataset_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap();
        assert_eq!(
            snapshot_handle("tank/apps/web", at),
            "tank/apps/web@snapshot_20240601_123045"
        );
    }

    #[tokio::test]
    async fn memory_snapshotter_tracks_lifecycle() {
        let snapshotter = MemorySnapshotter::new();

        let first = snapshotter.create("tank/web").await.unwrap();
        let second = snapshotter.create("tank/web").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(snapshotter.live().await.len(), 2);

        snapshotter.rollback(&first).await.unwrap();
        assert_eq!(snapshotter.rolled_back().await, vec![first.clone()]);

        snapshotter.destroy(&first).await.unwrap();
        assert_eq!(snapshotter.live().await, vec![second]);
        assert!(snapshotter.destroy(&first).await.is_err());
        assert!(snapshotter.rollback("tank/web@missing").await.is_err());
    }
}
