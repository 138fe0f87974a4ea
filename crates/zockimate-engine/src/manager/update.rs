//! Update engine: check, pre-snapshot, recreate, wait-for-ready, and the
//! compensating rollback on failure.
//!
//! The lock is held only across the mutation window (serialize configs,
//! recreate, wait). Compensation runs after the guard is dropped so the
//! nested rollback can take the lock itself.

use tracing::{error, info, instrument};

use zockimate_common::options::{
    CheckOptions, RollbackOptions, SnapshotOptions, UpdateOptions, DEFAULT_CHECK_TIMEOUT,
};
use zockimate_common::result::UpdateResult;
use zockimate_common::{labels, Result};

use crate::docker::{self, DockerClient};
use crate::notify::NotificationType;

use super::ContainerManager;

impl ContainerManager {
    #[instrument(skip(self, opts))]
    pub async fn update(&self, name: &str, opts: &UpdateOptions) -> Result<UpdateResult> {
        let name = labels::clean_container_name(name).to_string();
        info!(container = %name, "starting update");

        if opts.dry_run {
            info!(container = %name, "dry run: would update container");
            return Ok(UpdateResult {
                container_name: name,
                success: true,
                ..Default::default()
            });
        }

        let check = self
            .check(
                &name,
                &CheckOptions {
                    force: opts.force,
                    cleanup: false,
                    notify: false,
                    timeout: DEFAULT_CHECK_TIMEOUT,
                },
            )
            .await?;

        if !check.needs_update && !opts.force {
            info!(container = %name, "no update needed");
            return Ok(UpdateResult {
                container_name: name,
                success: true,
                needs_update: false,
                old_image: Some(check.current_image),
                new_image: Some(check.update_image),
                ..Default::default()
            });
        }

        // The pre-snapshot must survive until the update concludes; a
        // retention sweep is not allowed to reap it mid-flight.
        let pre_snapshot = self
            .capture_snapshot(
                &name,
                &SnapshotOptions {
                    no_cleanup: true,
                    ..SnapshotOptions::with_message("Pre-update snapshot")
                },
            )
            .await?;

        let outcome = {
            let _guard = self.lock.write().await;
            self.apply_update(&name, opts).await
        };

        match outcome {
            Ok(()) => {
                info!(
                    container = %name,
                    image = %labels::shorten_id(&check.update_image.id),
                    "successfully updated container"
                );
                if opts.notify {
                    self.notify(
                        NotificationType::Success,
                        "Update Successful",
                        &format!(
                            "Container {name} successfully updated from {} to {}",
                            check.current_image, check.update_image
                        ),
                        &["success", "update"],
                    )
                    .await;
                }
                Ok(UpdateResult {
                    container_name: name,
                    success: true,
                    needs_update: check.needs_update,
                    snapshot_id: pre_snapshot.id,
                    old_image: Some(check.current_image),
                    new_image: Some(check.update_image),
                    ..Default::default()
                })
            }
            Err(update_err) => {
                error!(
                    container = %name,
                    error = %update_err,
                    "update failed, initiating rollback"
                );
                let recovery = RollbackOptions::recovery(pre_snapshot.id);
                let message = match self.rollback(&name, &recovery).await {
                    Ok(rollback) if rollback.success => {
                        format!("update failed, rolled back to previous version: {update_err}")
                    }
                    Ok(rollback) => format!(
                        "update failed and rollback failed: {} (original error: {update_err})",
                        rollback.error.unwrap_or_else(|| "unknown".to_string())
                    ),
                    Err(rollback_err) => format!(
                        "update failed and rollback failed: {rollback_err} (original error: {update_err})"
                    ),
                };
                if opts.notify {
                    self.notify(
                        NotificationType::Error,
                        "Update Failed",
                        &format!("Failed to update container {name}:\n{message}"),
                        &["error", "update"],
                    )
                    .await;
                }
                Ok(UpdateResult {
                    container_name: name,
                    success: false,
                    needs_update: check.needs_update,
                    rollback_needed: true,
                    snapshot_id: pre_snapshot.id,
                    old_image: Some(check.current_image),
                    new_image: Some(check.update_image),
                    error: Some(message),
                })
            }
        }
    }

    /// The mutation window: re-serialize the live configs, rewrite the
    /// intent labels, recreate on the update source and wait for readiness.
    /// Caller holds the write lock.
    async fn apply_update(&self, name: &str, opts: &UpdateOptions) -> Result<()> {
        let ctn = self.docker.inspect(name).await?;
        let (config, host_config, network_config) = DockerClient::configs(&ctn)?;
        let (mut config, host_config, network) =
            DockerClient::decode_configs(&config, &host_config, &network_config)?;

        let ctn_labels = docker::container_labels(&ctn);
        let mut label_map = config.labels.take().unwrap_or_default();

        // Updates always re-resolve from the operator's intended reference,
        // not the digest a rollback pinned.
        if let Some(original) = ctn_labels.get(labels::ORIGINAL_IMAGE) {
            label_map.insert(labels::ORIGINAL_IMAGE.to_string(), original.clone());
            config.image = Some(original.clone());
        }
        // A successful update leaves rolled-back state behind.
        label_map.remove(labels::SNAPSHOT_ID);
        config.labels = Some(label_map);

        self.docker
            .recreate(name, config, host_config, network)
            .await?;

        let timeout = labels::ready_timeout(&ctn_labels, opts.timeout);
        self.docker.wait_ready(name, timeout).await
    }
}
