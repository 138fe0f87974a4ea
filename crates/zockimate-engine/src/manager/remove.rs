//! Remove: delete a container's snapshot rows (and optionally the engine
//! container and the dataset snapshots behind the rows).

use tracing::{debug, warn};

use zockimate_common::options::RemoveOptions;
use zockimate_common::result::RemoveResult;
use zockimate_common::{labels, Result};

use super::ContainerManager;

impl ContainerManager {
    pub async fn remove(&self, name: &str, opts: &RemoveOptions) -> Result<RemoveResult> {
        let _guard = self.lock.write().await;

        let name = labels::clean_container_name(name).to_string();
        let mut result = RemoveResult {
            container_name: name.clone(),
            ..Default::default()
        };
        debug!(container = %name, "starting remove");

        if opts.dry_run {
            debug!(container = %name, "dry run: would remove container entries");
            result.success = true;
            return Ok(result);
        }

        let container_exists = self.docker.inspect(&name).await.is_ok();
        if container_exists {
            if !opts.force && !opts.with_container {
                result.error = Some(format!(
                    "container {name} still exists in Docker. Use --force or --with-container to remove anyway"
                ));
                return Ok(result);
            }
            if opts.with_container {
                if let Err(e) = self.docker.remove(&name).await {
                    result.error = Some(format!("failed to remove Docker container: {e}"));
                    return Ok(result);
                }
                result.container_removed = true;
                debug!(container = %name, "removed Docker container");
            }
        }

        match self.store.remove(&name, opts).await {
            Ok(deleted) => {
                result.entries_deleted = deleted;
                result.success = true;
                if deleted > 0 {
                    debug!(container = %name, deleted, "removed database entries");
                } else {
                    warn!(container = %name, "no database entries found for container");
                }
            }
            Err(e) => {
                result.error = Some(format!("failed to remove database entries: {e}"));
            }
        }

        Ok(result)
    }
}
