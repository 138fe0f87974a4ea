//! Snapshot-and-rollback-protected container update engine.
//!
//! The manager coordinates three independent backing stores (the container
//! engine, a SQLite snapshot store, and ZFS datasets) without a joint
//! transaction: mutations are ordered so that a crash between steps leaves
//! at worst an orphan snapshot row or dataset snapshot, both recoverable.

pub mod config;
pub mod docker;
pub mod image;
pub mod manager;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod zfs;

pub use config::Config;
pub use manager::ContainerManager;
pub use notify::{AppriseNotifier, NotificationType};
pub use scheduler::{ScheduledTask, Scheduler};
pub use store::SnapshotStore;
pub use zfs::{DatasetSnapshotter, MemorySnapshotter, ZfsSnapshotter};
