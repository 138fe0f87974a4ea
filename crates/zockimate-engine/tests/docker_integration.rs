//! End-to-end tests against a real Docker daemon. Run with
//! `cargo test -- --ignored` on a host with the daemon socket available.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::Docker;

use zockimate_common::options::{HistoryOptions, RollbackOptions, SnapshotOptions};
use zockimate_engine::docker::DockerClient;
use zockimate_engine::{Config as ZockimateConfig, ContainerManager, MemorySnapshotter, SnapshotStore};

const TEST_IMAGE: &str = "alpine:latest";

async fn test_manager(docker: &Docker) -> ContainerManager {
    let zfs = Arc::new(MemorySnapshotter::new());
    let store = SnapshotStore::open_in_memory(zfs.clone()).await.unwrap();
    ContainerManager::with_components(
        DockerClient::from_docker(docker.clone()),
        store,
        zfs,
        None,
        ZockimateConfig::default(),
    )
}

async fn spawn_test_container(docker: &Docker, name: &str, cmd: Vec<&str>) {
    let config = Config {
        image: Some(TEST_IMAGE.to_string()),
        cmd: Some(cmd.into_iter().map(String::from).collect()),
        labels: Some(HashMap::from([(
            "zockimate.enable".to_string(),
            "true".to_string(),
        )])),
        ..Default::default()
    };
    docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.to_string(),
                platform: None,
            }),
            config,
        )
        .await
        .unwrap();
    docker
        .start_container::<String>(name, None)
        .await
        .unwrap();
}

async fn cleanup_container(docker: &Docker, name: &str) {
    let _ = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn snapshot_capture_and_config_rollback() {
    let docker = Docker::connect_with_local_defaults().unwrap();
    let name = format!("zockimate-test-{}", std::process::id());
    spawn_test_container(&docker, &name, vec!["sleep", "3600"]).await;

    let manager = test_manager(&docker).await;

    let snapshot = manager
        .create_snapshot(&name, &SnapshotOptions::with_message("integration test"))
        .await
        .unwrap()
        .expect("not a dry run");
    assert!(snapshot.id > 0);
    assert!(!snapshot.image_ref.id.is_empty());
    assert!(!snapshot.config.is_empty());

    let history = manager.history(&HistoryOptions::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "integration test");

    // Restore the captured config; the container gets recreated and must
    // come back running with the rollback marker label.
    let result = manager
        .rollback(
            &name,
            &RollbackOptions {
                snapshot_id: snapshot.id,
                config: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);

    let ctn = DockerClient::from_docker(docker.clone())
        .inspect(&name)
        .await
        .unwrap();
    let labels = ctn.config.unwrap().labels.unwrap();
    assert_eq!(
        labels.get("zockimate.snapshot_id"),
        Some(&snapshot.id.to_string())
    );

    cleanup_container(&docker, &name).await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn wait_ready_times_out_on_an_exited_container() {
    let docker = Docker::connect_with_local_defaults().unwrap();
    let name = format!("zockimate-exit-{}", std::process::id());
    spawn_test_container(&docker, &name, vec!["true"]).await;

    // Give the container a moment to exit.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let client = DockerClient::from_docker(docker.clone());
    let err = client
        .wait_ready(&name, Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"), "{err}");

    cleanup_container(&docker, &name).await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn managed_listing_honors_the_enable_label() {
    let docker = Docker::connect_with_local_defaults().unwrap();
    let name = format!("zockimate-list-{}", std::process::id());
    spawn_test_container(&docker, &name, vec!["sleep", "3600"]).await;

    let manager = test_manager(&docker).await;
    let managed = manager.get_containers().await.unwrap();
    assert!(managed.contains(&name), "managed = {managed:?}");

    cleanup_container(&docker, &name).await;
}
