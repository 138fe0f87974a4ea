//! Shared types for the zockimate container update manager.

use thiserror::Error;

pub mod image;
pub mod labels;
pub mod options;
pub mod result;
pub mod snapshot;

pub use image::ImageReference;
pub use snapshot::{ContainerSnapshot, SnapshotMetadata};

/// Errors surfaced by the update/rollback engines and their collaborators,
/// grouped by cause. Batch drivers treat each of these as fatal for the
/// current container name and keep iterating.
#[derive(Error, Debug)]
pub enum ZockimateError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("no snapshot found for container {0}")]
    SnapshotNotFound(String),

    #[error("container {0} not enabled for management")]
    NotManaged(String),

    #[error("container {0} not running (use --all to include stopped containers)")]
    NotRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("failed to pull image {reference}: {reason}")]
    PullFailed { reference: String, reason: String },

    #[error("architecture mismatch: current={current}, latest={latest}")]
    PlatformMismatch { current: String, latest: String },

    #[error("zfs operation failed: {0}")]
    Filesystem(String),

    #[error("timeout waiting for container {0} to be ready")]
    ReadyTimeout(String),

    #[error("database error: {0}")]
    Store(String),

    #[error("cannot guarantee exact image version for rollback (use --force to override)")]
    CannotGuaranteeVersion,

    #[error("operation cancelled")]
    Cancelled,

    #[error("docker error: {0}")]
    Engine(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ZockimateError>;
