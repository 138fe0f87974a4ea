//! Rename: engine-level rename plus the store bookkeeping, with a revert of
//! the engine rename when the store update fails.

use tracing::{debug, warn};

use zockimate_common::options::RenameOptions;
use zockimate_common::result::RenameResult;
use zockimate_common::{labels, Result, ZockimateError};

use super::ContainerManager;

impl ContainerManager {
    /// Renames a managed container in the engine and rewrites its snapshot
    /// rows. Gate violations and recoverable failures are reported in the
    /// result rather than as errors, so batch drivers keep iterating.
    pub async fn rename(
        &self,
        old_name: &str,
        new_name: &str,
        opts: &RenameOptions,
    ) -> Result<RenameResult> {
        let _guard = self.lock.write().await;

        let old_name = labels::clean_container_name(old_name).to_string();
        let new_name = labels::clean_container_name(new_name).to_string();
        let mut result = RenameResult {
            old_name: old_name.clone(),
            new_name: new_name.clone(),
            ..Default::default()
        };

        if !opts.db_only {
            if self.docker.inspect(&new_name).await.is_ok() {
                result.error = Some(format!(
                    "container with name {new_name} already exists in Docker"
                ));
                return Ok(result);
            }

            let ctn = match self.docker.inspect(&old_name).await {
                Ok(ctn) => ctn,
                Err(ZockimateError::ContainerNotFound(_)) => {
                    result.error = Some(format!("source container {old_name} does not exist"));
                    return Ok(result);
                }
                Err(e) => return Err(e),
            };
            if let Err(e) = self.guard_managed(&old_name, &ctn) {
                result.error = Some(e.to_string());
                return Ok(result);
            }

            if let Err(e) = self.docker.rename(&old_name, &new_name).await {
                result.error = Some(format!("failed to rename container in Docker: {e}"));
                return Ok(result);
            }
            result.engine_renamed = true;
            debug!(old = %old_name, new = %new_name, "container renamed in engine");
        }

        match self.store.rename(&old_name, &new_name).await {
            Ok(affected) => {
                result.entries_renamed = affected;
                result.success = true;
                if affected > 0 {
                    debug!(
                        affected,
                        old = %old_name,
                        new = %new_name,
                        "updated database entries"
                    );
                } else {
                    warn!(container = %old_name, "no database entries found for container");
                }
            }
            Err(store_err) => {
                // The engine rename already happened; undo it so the two
                // stores cannot disagree about the container's name.
                if result.engine_renamed {
                    if let Err(revert_err) = self.docker.rename(&new_name, &old_name).await {
                        result.error = Some(format!(
                            "failed to update database and revert of Docker rename failed: {revert_err} (original error: {store_err})"
                        ));
                        return Ok(result);
                    }
                    result.engine_renamed = false;
                }
                result.error = Some(format!(
                    "failed to update container name in database: {store_err}"
                ));
            }
        }

        Ok(result)
    }
}
