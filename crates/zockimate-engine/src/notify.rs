//! Fire-and-forget notifications to an Apprise-style HTTP endpoint.
//!
//! Delivery is best-effort by contract: a failed or non-2xx POST is logged
//! and never fails the operation that triggered it.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use zockimate_common::Result;
use zockimate_common::ZockimateError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(rename = "type")]
    kind: NotificationType,
    tags: &'a [&'a str],
}

pub struct AppriseNotifier {
    url: String,
    client: reqwest::Client,
}

impl AppriseNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ZockimateError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// POSTs the notification and logs the outcome. Never propagates a
    /// delivery failure.
    pub async fn send(&self, title: &str, body: &str, kind: NotificationType, tags: &[&str]) {
        let payload = Payload {
            title,
            body,
            kind,
            tags,
        };
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title, "notification sent");
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(title, error = %e, "failed to send notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_to_the_wire_shape() {
        let payload = Payload {
            title: "Update Successful",
            body: "Container web updated",
            kind: NotificationType::Success,
            tags: &["update", "web"],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Update Successful",
                "body": "Container web updated",
                "type": "success",
                "tags": ["update", "web"],
            })
        );
    }
}
