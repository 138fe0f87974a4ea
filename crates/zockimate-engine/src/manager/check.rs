//! Check engine: is a newer image available for a container?

use tracing::{debug, instrument};

use zockimate_common::options::CheckOptions;
use zockimate_common::result::CheckResult;
use zockimate_common::{labels, ImageReference, Result, ZockimateError};

use crate::docker;
use crate::notify::NotificationType;

use super::ContainerManager;

/// Update decision over two resolved identities. When both sides are
/// exactly pinned, digests are compared when both carry one; in every other
/// case the post-pull local ids decide.
pub fn needs_update(current: &ImageReference, latest: &ImageReference) -> bool {
    if current.is_exact() && latest.is_exact() {
        if !current.repo_digest.is_empty() && !latest.repo_digest.is_empty() {
            return current.repo_digest != latest.repo_digest;
        }
    }
    current.id != latest.id
}

impl ContainerManager {
    /// Pulls the container's update source and reports whether its identity
    /// differs from what currently runs.
    #[instrument(skip(self, opts))]
    pub async fn check(&self, name: &str, opts: &CheckOptions) -> Result<CheckResult> {
        let _guard = self.lock.write().await;

        let name = labels::clean_container_name(name);
        debug!(container = name, "starting check");

        let ctn = self.docker.inspect(name).await?;
        self.guard_managed(name, &ctn)?;

        let current = self
            .resolver
            .resolve(&ctn.image.clone().unwrap_or_default())
            .await?;

        // The update source is the operator's original reference when a
        // rollback pinned the running image, else the configured one.
        let ctn_labels = docker::container_labels(&ctn);
        let update_ref = ctn_labels
            .get(labels::ORIGINAL_IMAGE)
            .cloned()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| docker::configured_image(&ctn));

        self.resolver.pull(&update_ref, opts.timeout).await?;
        let latest = self.resolver.resolve(&update_ref).await?;

        if current.platform != latest.platform {
            return Err(ZockimateError::PlatformMismatch {
                current: current.platform,
                latest: latest.platform,
            });
        }

        let needs_update = needs_update(&current, &latest);

        if opts.cleanup && needs_update {
            debug!(container = name, "removing pulled update image");
            if let Err(e) = self.resolver.remove(&latest.id).await {
                tracing::warn!(image = %latest.id, error = %e, "failed to cleanup image");
            }
        }

        if needs_update {
            debug!(
                container = name,
                current = %labels::shorten_id(&current.id),
                latest = %labels::shorten_id(&latest.id),
                "update available"
            );
            if opts.notify {
                self.notify(
                    NotificationType::Info,
                    "Update Available",
                    &format!(
                        "Container {name} has an update available.\nCurrent: {current}\nLatest: {latest}"
                    ),
                    &["info", "update-available"],
                )
                .await;
            }
        } else {
            debug!(container = name, "no update needed");
        }

        Ok(CheckResult {
            needs_update,
            current_image: current,
            update_image: latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, digest: &str) -> ImageReference {
        ImageReference {
            id: id.to_string(),
            repo_digest: digest.to_string(),
            tag: "nginx:1.24".to_string(),
            original: "nginx:1.24".to_string(),
            platform: "amd64/linux".to_string(),
        }
    }

    #[test]
    fn equal_digests_mean_no_update() {
        let current = image("sha256:aaa", "nginx@sha256:x");
        let latest = image("sha256:bbb", "nginx@sha256:x");
        assert!(!needs_update(&current, &latest));
    }

    #[test]
    fn differing_digests_mean_update() {
        let current = image("sha256:aaa", "nginx@sha256:x");
        let latest = image("sha256:aaa", "nginx@sha256:y");
        assert!(needs_update(&current, &latest));
    }

    #[test]
    fn missing_digest_falls_back_to_local_ids() {
        let current = image("sha256:aaa", "");
        let latest = image("sha256:bbb", "nginx@sha256:y");
        assert!(needs_update(&current, &latest));

        let same = image("sha256:aaa", "");
        assert!(!needs_update(&current, &same));
    }

    #[test]
    fn non_exact_references_compare_ids() {
        let mut current = image("", "");
        current.tag = "nginx:latest".to_string();
        let latest = image("sha256:bbb", "");
        assert!(needs_update(&current, &latest));
    }
}
