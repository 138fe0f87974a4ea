//! Image resolver: pulls references and normalizes local image identity.
//!
//! The pull/inspect split matters: deciding whether an update exists means
//! pulling the candidate reference first and inspecting afterwards, because
//! inspecting pre-pull would compare against stale local state.

use std::time::Duration;

use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, instrument};

use zockimate_common::{ImageReference, Result, ZockimateError};

#[derive(Clone)]
pub struct ImageResolver {
    docker: Docker,
}

impl ImageResolver {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Resolves a reference against the local image store into a normalized
    /// identity record. Picks the first repo digest and first repo tag when
    /// several exist.
    pub async fn resolve(&self, reference: &str) -> Result<ImageReference> {
        let inspect = self.docker.inspect_image(reference).await.map_err(|e| {
            if is_not_found(&e) {
                ZockimateError::ImageNotFound(reference.to_string())
            } else {
                ZockimateError::Engine(format!("failed to inspect image {reference}: {e}"))
            }
        })?;

        Ok(ImageReference {
            id: inspect.id.unwrap_or_default(),
            repo_digest: inspect
                .repo_digests
                .and_then(|d| d.into_iter().next())
                .unwrap_or_default(),
            tag: inspect
                .repo_tags
                .and_then(|t| t.into_iter().next())
                .unwrap_or_default(),
            original: reference.to_string(),
            platform: format!(
                "{}/{}",
                inspect.architecture.unwrap_or_default(),
                inspect.os.unwrap_or_default()
            ),
        })
    }

    /// Pulls a reference, discarding the progress stream, bounded by
    /// `timeout`.
    #[instrument(skip(self))]
    pub async fn pull(&self, reference: &str, timeout: Duration) -> Result<()> {
        let drain = async {
            let mut stream = self.docker.create_image(
                Some(CreateImageOptions {
                    from_image: reference.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            );
            while let Some(progress) = stream.next().await {
                progress.map_err(|e| ZockimateError::PullFailed {
                    reference: reference.to_string(),
                    reason: e.to_string(),
                })?;
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result,
            Err(_) => Err(ZockimateError::PullFailed {
                reference: reference.to_string(),
                reason: format!("pull timed out after {}s", timeout.as_secs()),
            }),
        }?;
        debug!(image = reference, "pull completed");
        Ok(())
    }

    /// Removes an image, pruning untagged children. Absence is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let result = self
            .docker
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(image = id, "image already removed");
                Ok(())
            }
            Err(e) => Err(ZockimateError::Engine(format!(
                "failed to remove image {id}: {e}"
            ))),
        }
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
