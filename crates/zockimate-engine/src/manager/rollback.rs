//! Rollback engine: restores a stored snapshot (image, data, config
//! aspects), protected by a safety snapshot of the state being left.
//!
//! Compensation is recursive: when applying a rollback fails past the
//! safety snapshot, the engine rolls back to that safety snapshot with
//! every aspect forced. The recursive call happens after the lock guard is
//! dropped and goes through a boxed future.

use std::future::Future;
use std::pin::Pin;

use tracing::{error, info, instrument};

use zockimate_common::options::{RollbackOptions, SnapshotOptions, DEFAULT_PULL_TIMEOUT};
use zockimate_common::result::RollbackResult;
use zockimate_common::{labels, ContainerSnapshot, Result, ZockimateError};

use crate::docker::DockerClient;
use crate::notify::NotificationType;

use super::ContainerManager;

impl ContainerManager {
    #[instrument(skip(self, opts), fields(snapshot_id = opts.snapshot_id))]
    pub async fn rollback(&self, name: &str, opts: &RollbackOptions) -> Result<RollbackResult> {
        self.rollback_recursive(
            labels::clean_container_name(name).to_string(),
            opts.clone(),
        )
        .await
    }

    fn rollback_recursive(
        &self,
        name: String,
        opts: RollbackOptions,
    ) -> Pin<Box<dyn Future<Output = Result<RollbackResult>> + Send + '_>> {
        Box::pin(async move {
            info!(container = %name, snapshot_id = opts.snapshot_id, "rolling back container");

            // Compensating rollbacks run forced and must work on a container
            // that is stopped or mid-recreation, so the gates only apply to
            // operator-initiated calls.
            if !opts.force {
                let ctn = self.docker.inspect(&name).await?;
                self.guard_managed(&name, &ctn)?;
            }

            let snapshot = self.store.get(&name, opts.snapshot_id).await?;

            // Captured unconditionally, before any mutation; a failure here
            // aborts the rollback with nothing touched.
            let safety = self
                .capture_snapshot(
                    &name,
                    &SnapshotOptions {
                        force: true,
                        no_cleanup: true,
                        ..SnapshotOptions::with_message(format!(
                            "Auto-save before rollback to snapshot {}",
                            snapshot.id
                        ))
                    },
                )
                .await?;

            let outcome = {
                let _guard = self.lock.write().await;
                self.apply_rollback(&name, &snapshot, &opts).await
            };

            let mut result = RollbackResult {
                container_name: name.clone(),
                snapshot_id: snapshot.id,
                safety_snapshot_id: safety.id,
                image_rollback: opts.image,
                data_rollback: opts.data,
                config_rollback: opts.config,
                ..Default::default()
            };

            match outcome {
                Ok(()) => {
                    info!(
                        container = %name,
                        snapshot_id = snapshot.id,
                        "successfully rolled back container"
                    );
                    if opts.notify {
                        self.notify(
                            NotificationType::Success,
                            "Rollback Successful",
                            &format!(
                                "Container {name} successfully rolled back to snapshot {} (Image: {})",
                                snapshot.id, snapshot.image_ref
                            ),
                            &["success", "rollback"],
                        )
                        .await;
                    }
                    result.success = true;
                    Ok(result)
                }
                Err(rollback_err) => {
                    error!(
                        container = %name,
                        error = %rollback_err,
                        "rollback failed, attempting to restore from safety snapshot"
                    );
                    let recovery = RollbackOptions::recovery(safety.id);
                    result.error = Some(
                        match self.rollback_recursive(name.clone(), recovery).await {
                            Ok(restored) if restored.success => format!(
                                "rollback failed, restored safety snapshot {}: {rollback_err}",
                                safety.id
                            ),
                            Ok(restored) => format!(
                                "rollback failed and restore of safety snapshot failed: {} (original error: {rollback_err})",
                                restored.error.unwrap_or_else(|| "unknown".to_string())
                            ),
                            Err(restore_err) => format!(
                                "rollback failed and restore of safety snapshot failed: {restore_err} (original error: {rollback_err})"
                            ),
                        },
                    );
                    Ok(result)
                }
            }
        })
    }

    /// The mutation window: replay the stored configs with rollback-intent
    /// labels, pull and pin the stored image when requested, roll the
    /// dataset back, recreate and wait for readiness. Caller holds the
    /// write lock.
    async fn apply_rollback(
        &self,
        name: &str,
        snapshot: &ContainerSnapshot,
        opts: &RollbackOptions,
    ) -> Result<()> {
        let (mut config, host_config, network) = DockerClient::decode_configs(
            &snapshot.config,
            &snapshot.host_config,
            &snapshot.network_config,
        )?;

        let mut label_map = config.labels.take().unwrap_or_default();
        // Mark the rolled-back state so a future update knows to re-resolve
        // the original reference.
        label_map.insert(labels::SNAPSHOT_ID.to_string(), snapshot.id.to_string());

        if opts.image {
            // An image rollback without an exact reference cannot guarantee
            // the restored bytes.
            if !opts.force && !snapshot.image_ref.is_exact() {
                return Err(ZockimateError::CannotGuaranteeVersion);
            }

            let reference = snapshot.image_ref.best_reference().to_string();
            self.resolver.pull(&reference, DEFAULT_PULL_TIMEOUT).await?;
            config.image = Some(reference);
            if !snapshot.image_ref.original.is_empty() {
                label_map.insert(
                    labels::ORIGINAL_IMAGE.to_string(),
                    snapshot.image_ref.original.clone(),
                );
            }
        }

        if opts.data && !snapshot.zfs_snapshot.is_empty() {
            self.zfs.rollback(&snapshot.zfs_snapshot).await?;
        }

        let timeout = labels::ready_timeout(&label_map, opts.timeout);
        config.labels = Some(label_map);

        self.docker
            .recreate(name, config, host_config, network)
            .await?;
        self.docker.wait_ready(name, timeout).await
    }
}
