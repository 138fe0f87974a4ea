use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image::ImageReference;

/// Immutable record of a container's state at one instant: image identity,
/// the three serialized engine config blobs needed to recreate it
/// identically, and the handle of the ZFS snapshot taken alongside (empty if
/// the container has no dataset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Store-assigned id, monotonically increasing. Zero until saved.
    pub id: i64,
    pub container_name: String,
    pub image_ref: ImageReference,
    #[serde(with = "blob")]
    pub config: Vec<u8>,
    #[serde(with = "blob")]
    pub host_config: Vec<u8>,
    #[serde(with = "blob")]
    pub network_config: Vec<u8>,
    /// `dataset@name` handle, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zfs_snapshot: String,
    /// Short tag: `snapshot`, `pre-update`, `pre-rollback`, …
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// History projection of a snapshot, without the config blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: i64,
    pub container_name: String,
    pub image_tag: String,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_digest: String,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// Config blobs are engine JSON; base64 keeps them opaque in our own JSON
// output (`history --json`).
mod blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_round_trips_config_blobs() {
        let snap = ContainerSnapshot {
            id: 42,
            container_name: "web".to_string(),
            image_ref: ImageReference {
                id: "sha256:abc".to_string(),
                tag: "nginx:1.24".to_string(),
                ..Default::default()
            },
            config: br#"{"Image":"nginx:1.24"}"#.to_vec(),
            host_config: b"{}".to_vec(),
            network_config: br#"{"EndpointsConfig":{}}"#.to_vec(),
            zfs_snapshot: "tank/web@snapshot_20240601_123045".to_string(),
            status: "snapshot".to_string(),
            message: "Pre-update snapshot".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&snap).unwrap();
        let back: ContainerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.config, snap.config);
        assert_eq!(back.host_config, snap.host_config);
        assert_eq!(back.network_config, snap.network_config);
        assert_eq!(back.zfs_snapshot, snap.zfs_snapshot);
    }
}
