//! The container manager: owns the engine adapter, the snapshot store, the
//! dataset snapshotter and the notifier, and serializes every mutation of
//! container state behind one process-wide lock.

mod check;
mod remove;
mod rename;
mod rollback;
mod update;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use zockimate_common::options::SnapshotOptions;
use zockimate_common::{labels, ContainerSnapshot, Result, SnapshotMetadata, ZockimateError};

use crate::config::Config;
use crate::docker::{self, DockerClient};
use crate::image::ImageResolver;
use crate::notify::{AppriseNotifier, NotificationType};
use crate::store::SnapshotStore;
use crate::zfs::{DatasetSnapshotter, ZfsSnapshotter};

pub use check::needs_update;

pub struct ContainerManager {
    docker: DockerClient,
    resolver: ImageResolver,
    store: SnapshotStore,
    zfs: Arc<dyn DatasetSnapshotter>,
    notifier: Option<AppriseNotifier>,
    config: Config,
    /// Write side guards every mutation window (serialize, recreate,
    /// wait-ready); read side covers history queries. Compensation paths
    /// re-enter after the guard is dropped, never while holding it.
    lock: RwLock<()>,
}

impl ContainerManager {
    /// Connects to the engine, opens the store, and wires the production
    /// collaborators.
    pub async fn new(config: Config) -> Result<Self> {
        let docker = DockerClient::connect().await?;
        let zfs: Arc<dyn DatasetSnapshotter> = Arc::new(ZfsSnapshotter::new());
        let store = SnapshotStore::open(&config.db_path, zfs.clone()).await?;
        let notifier = match &config.apprise_url {
            Some(url) => match AppriseNotifier::new(url) {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!(error = %e, "failed to initialize notifications");
                    None
                }
            },
            None => None,
        };
        Ok(Self::with_components(docker, store, zfs, notifier, config))
    }

    /// Dependency-injecting constructor, used by tests to swap in fakes.
    pub fn with_components(
        docker: DockerClient,
        store: SnapshotStore,
        zfs: Arc<dyn DatasetSnapshotter>,
        notifier: Option<AppriseNotifier>,
        config: Config,
    ) -> Self {
        Self {
            resolver: ImageResolver::new(docker.docker().clone()),
            docker,
            store,
            zfs,
            notifier,
            config,
            lock: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Names of the containers this instance manages: those carrying the
    /// enable label, or every container under the no-filter override.
    pub async fn get_containers(&self) -> Result<Vec<String>> {
        let containers = self.docker.list(self.config.all).await?;
        let mut managed = Vec::new();
        for ctn in containers {
            let enabled = self.config.no_filter
                || ctn.labels.as_ref().is_some_and(labels::is_enabled);
            if !enabled {
                continue;
            }
            if let Some(name) = ctn.names.as_ref().and_then(|n| n.first()) {
                managed.push(labels::clean_container_name(name).to_string());
            }
        }
        Ok(managed)
    }

    /// Captures the container's current state: image identity, the three
    /// engine config blobs, and a dataset snapshot when the container names
    /// one. Returns `None` on dry-run.
    pub async fn create_snapshot(
        &self,
        name: &str,
        opts: &SnapshotOptions,
    ) -> Result<Option<ContainerSnapshot>> {
        if opts.dry_run {
            debug!(container = name, "dry run: would create snapshot");
            return Ok(None);
        }
        Ok(Some(self.capture_snapshot(name, opts).await?))
    }

    /// Snapshot capture proper, used directly by the update and rollback
    /// engines for their pre/safety snapshots.
    pub(crate) async fn capture_snapshot(
        &self,
        name: &str,
        opts: &SnapshotOptions,
    ) -> Result<ContainerSnapshot> {
        let _guard = self.lock.write().await;
        let name = labels::clean_container_name(name);
        debug!(container = name, message = %opts.message, "creating snapshot");

        let ctn = self.docker.inspect(name).await?;
        if !opts.force && !docker::is_running(&ctn) {
            return Err(ZockimateError::NotRunning(name.to_string()));
        }

        let image_id = ctn.image.clone().unwrap_or_default();
        let mut image_ref = self.resolver.resolve(&image_id).await?;

        // Preserve the operator's intended reference so future updates keep
        // tracking upstream even after a rollback pinned the image.
        let ctn_labels = docker::container_labels(&ctn);
        image_ref.original = match ctn_labels.get(labels::ORIGINAL_IMAGE) {
            Some(original) => original.clone(),
            None => docker::configured_image(&ctn),
        };

        let zfs_snapshot = match labels::zfs_dataset(&ctn_labels) {
            Some(dataset) => self.zfs.create(dataset).await?,
            None => String::new(),
        };

        let configs = DockerClient::configs(&ctn);
        let (config, host_config, network_config) = match configs {
            Ok(blobs) => blobs,
            Err(e) => {
                self.discard_dataset_snapshot(&zfs_snapshot).await;
                return Err(e);
            }
        };

        let mut snapshot = ContainerSnapshot {
            id: 0,
            container_name: name.to_string(),
            image_ref,
            config,
            host_config,
            network_config,
            zfs_snapshot: zfs_snapshot.clone(),
            status: "snapshot".to_string(),
            message: opts.message.clone(),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.store.save(&mut snapshot).await {
            self.discard_dataset_snapshot(&zfs_snapshot).await;
            return Err(e);
        }

        if !opts.no_cleanup {
            if let Err(e) = self.store.cleanup(name, self.config.retention).await {
                warn!(container = name, error = %e, "failed to cleanup old snapshots");
            }
        }

        debug!(container = name, id = snapshot.id, "created snapshot");
        Ok(snapshot)
    }

    /// Snapshot history, shared-locked.
    pub async fn history(
        &self,
        opts: &zockimate_common::options::HistoryOptions,
    ) -> Result<Vec<SnapshotMetadata>> {
        let _guard = self.lock.read().await;
        self.store.history(opts).await
    }

    async fn discard_dataset_snapshot(&self, handle: &str) {
        if handle.is_empty() {
            return;
        }
        if let Err(e) = self.zfs.destroy(handle).await {
            warn!(%handle, error = %e, "failed to discard dataset snapshot");
        }
    }

    pub(crate) async fn notify(
        &self,
        kind: NotificationType,
        title: &str,
        body: &str,
        tags: &[&str],
    ) {
        if let Some(notifier) = &self.notifier {
            notifier.send(title, body, kind, tags).await;
        }
    }

    /// Shared management/running gate used by check, update, rollback and
    /// rename before touching a container.
    pub(crate) fn guard_managed(
        &self,
        name: &str,
        ctn: &bollard::models::ContainerInspectResponse,
    ) -> Result<()> {
        let ctn_labels = docker::container_labels(ctn);
        if !self.config.no_filter && !labels::is_enabled(&ctn_labels) {
            return Err(ZockimateError::NotManaged(name.to_string()));
        }
        if !self.config.all && !docker::is_running(ctn) {
            return Err(ZockimateError::NotRunning(name.to_string()));
        }
        Ok(())
    }
}
