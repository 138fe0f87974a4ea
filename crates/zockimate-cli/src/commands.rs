use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info};

use zockimate_common::options::{
    CheckOptions, HistoryOptions, RemoveOptions, RenameOptions, RollbackOptions, SnapshotOptions,
    SortBy, UpdateOptions,
};
use zockimate_common::result::BatchSummary;
use zockimate_common::labels;
use zockimate_engine::{Config, ContainerManager, ScheduledTask, Scheduler};

use crate::cli::{Command, ScheduleMode, SortField, ZockimateArgs};

/// Runs the parsed command and returns the process exit code: 0 on success,
/// 1 on any per-name failure or when `check` finds an update.
pub async fn run(args: ZockimateArgs) -> anyhow::Result<i32> {
    let config = Config {
        log_level: args.log_level.clone(),
        db_path: args.db.clone(),
        apprise_url: args.apprise_url.clone(),
        all: args.all,
        no_filter: args.no_filter,
        retention: args.retention,
        timeout: Duration::from_secs(args.timeout),
    };
    config.validate().context("invalid configuration")?;

    let manager = Arc::new(
        ContainerManager::new(config)
            .await
            .context("failed to initialize container manager")?,
    );

    match args.command {
        Command::Check {
            containers,
            cleanup,
            notify,
        } => {
            let opts = CheckOptions {
                cleanup,
                notify,
                ..Default::default()
            };
            check(&manager, containers, &opts).await
        }
        Command::Update {
            containers,
            force,
            dry_run,
            notify,
        } => {
            let opts = UpdateOptions {
                force,
                dry_run,
                notify,
                ..Default::default()
            };
            opts.validate()?;
            update(&manager, containers, &opts).await
        }
        Command::Save {
            containers,
            message,
            force,
            dry_run,
        } => {
            let opts = SnapshotOptions {
                message,
                force,
                dry_run,
                no_cleanup: false,
            };
            save(&manager, containers, &opts).await
        }
        Command::Rollback {
            container,
            snapshot_id,
            image,
            data,
            config,
            force,
            notify,
        } => {
            // No aspect flags means a full restore.
            let (image, data, config) = if image || data || config {
                (image, data, config)
            } else {
                (true, true, true)
            };
            let opts = RollbackOptions {
                snapshot_id: snapshot_id.unwrap_or(0),
                image,
                data,
                config,
                force,
                notify,
                ..Default::default()
            };
            rollback(&manager, &container, &opts).await
        }
        Command::History {
            containers,
            limit,
            last,
            sort_by,
            json,
            search,
            since,
            before,
        } => {
            let opts = HistoryOptions {
                containers,
                since: parse_bound(since.as_deref())?,
                before: parse_bound(before.as_deref())?,
                search: search.unwrap_or_default(),
                sort_by: match sort_by {
                    SortField::Date => SortBy::Date,
                    SortField::Container => SortBy::Container,
                },
                last,
                limit: limit.unwrap_or(0),
            };
            history(&manager, &opts, json).await
        }
        Command::Rename {
            old_name,
            new_name,
            db_only,
        } => rename(&manager, &old_name, &new_name, &RenameOptions { db_only }).await,
        Command::Remove {
            container,
            all,
            before,
            older_than,
            with_container,
            force,
            zfs,
            dry_run,
        } => {
            let older_than = match older_than.as_deref() {
                Some(raw) => Some(
                    labels::parse_go_duration(raw)
                        .with_context(|| format!("invalid duration: {raw:?}"))?,
                ),
                None => None,
            };
            let opts = RemoveOptions {
                force,
                with_container,
                older_than,
                before: parse_bound(before.as_deref())?,
                all,
                dry_run,
                zfs,
            };
            remove(&manager, &container, &opts).await
        }
        Command::Schedule { mode } => schedule(manager, mode).await,
    }
}

fn parse_bound(raw: Option<&str>) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    match raw {
        None => Ok(None),
        Some(raw) => match labels::parse_time(raw) {
            Some(at) => Ok(Some(at)),
            None => bail!("invalid time {raw:?} (use YYYY-MM-DD or RFC 3339)"),
        },
    }
}

/// Explicit names as given, else every managed container.
async fn resolve_containers(
    manager: &ContainerManager,
    containers: Vec<String>,
) -> anyhow::Result<Vec<String>> {
    if !containers.is_empty() {
        return Ok(containers);
    }
    Ok(manager.get_containers().await?)
}

async fn check(
    manager: &ContainerManager,
    containers: Vec<String>,
    opts: &CheckOptions,
) -> anyhow::Result<i32> {
    let containers = resolve_containers(manager, containers).await?;
    if containers.is_empty() {
        info!("no containers found to check");
        return Ok(0);
    }

    let mut updates_available = 0usize;
    let mut failed = 0usize;
    for name in &containers {
        match manager.check(name, opts).await {
            Ok(result) if result.needs_update => {
                updates_available += 1;
                println!(
                    "{name}: update available\n  current: {}\n  latest:  {}",
                    result.current_image, result.update_image
                );
            }
            Ok(_) => println!("{name}: up to date"),
            Err(e) => {
                failed += 1;
                error!(container = %name, error = %e, "check failed");
            }
        }
    }

    println!(
        "checked {}: {} with updates, {} failed",
        containers.len(),
        updates_available,
        failed
    );
    Ok(i32::from(updates_available > 0 || failed > 0))
}

async fn update(
    manager: &ContainerManager,
    containers: Vec<String>,
    opts: &UpdateOptions,
) -> anyhow::Result<i32> {
    let containers = resolve_containers(manager, containers).await?;
    if containers.is_empty() {
        info!("no containers found to update");
        return Ok(0);
    }

    let mut summary = BatchSummary::default();
    for name in &containers {
        match manager.update(name, opts).await {
            Ok(result) => {
                if result.success && result.needs_update {
                    println!(
                        "✓ {name}: updated from {} to {}",
                        result
                            .old_image
                            .as_ref()
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        result
                            .new_image
                            .as_ref()
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                    );
                } else if result.success {
                    println!("- {name}: up to date");
                } else {
                    println!(
                        "✗ {name}: {}",
                        result.error.as_deref().unwrap_or("update failed")
                    );
                }
                summary.record_update(&result);
            }
            Err(e) => {
                summary.record_failure();
                error!(container = %name, error = %e, "update failed");
                println!("✗ {name}: {e}");
            }
        }
    }

    println!(
        "updated {}, skipped {}, failed {}",
        summary.updated, summary.skipped, summary.failed
    );
    Ok(i32::from(!summary.all_succeeded()))
}

async fn save(
    manager: &ContainerManager,
    containers: Vec<String>,
    opts: &SnapshotOptions,
) -> anyhow::Result<i32> {
    let containers = resolve_containers(manager, containers).await?;
    if containers.is_empty() {
        info!("no containers found to snapshot");
        return Ok(0);
    }

    let mut failed = 0usize;
    for name in &containers {
        match manager.create_snapshot(name, opts).await {
            Ok(Some(snapshot)) => {
                println!("✓ {name}: snapshot {} created", snapshot.id);
            }
            Ok(None) => println!("- {name}: dry run, nothing captured"),
            Err(e) => {
                failed += 1;
                error!(container = %name, error = %e, "snapshot failed");
                println!("✗ {name}: {e}");
            }
        }
    }
    Ok(i32::from(failed > 0))
}

async fn rollback(
    manager: &ContainerManager,
    container: &str,
    opts: &RollbackOptions,
) -> anyhow::Result<i32> {
    let result = manager.rollback(container, opts).await?;
    if result.success {
        println!(
            "✓ {container}: rolled back to snapshot {} (safety snapshot {})",
            result.snapshot_id, result.safety_snapshot_id
        );
        Ok(0)
    } else {
        println!(
            "✗ {container}: {}",
            result.error.as_deref().unwrap_or("rollback failed")
        );
        Ok(1)
    }
}

async fn history(
    manager: &ContainerManager,
    opts: &HistoryOptions,
    json: bool,
) -> anyhow::Result<i32> {
    let entries = manager.history(opts).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    if entries.is_empty() {
        println!("no snapshots found");
        return Ok(0);
    }
    println!(
        "{:<6} {:<20} {:<28} {:<12} {:<20} {}",
        "ID", "CONTAINER", "IMAGE", "STATUS", "CREATED", "MESSAGE"
    );
    for entry in entries {
        let image = if entry.image_tag.is_empty() {
            labels::shorten_id(&entry.image_id).to_string()
        } else {
            entry.image_tag.clone()
        };
        println!(
            "{:<6} {:<20} {:<28} {:<12} {:<20} {}",
            entry.id,
            entry.container_name,
            image,
            entry.status,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.message
        );
    }
    Ok(0)
}

async fn rename(
    manager: &ContainerManager,
    old_name: &str,
    new_name: &str,
    opts: &RenameOptions,
) -> anyhow::Result<i32> {
    let result = manager.rename(old_name, new_name, opts).await?;
    if result.success {
        println!(
            "✓ renamed {old_name} to {new_name} ({} history entries)",
            result.entries_renamed
        );
        Ok(0)
    } else {
        println!(
            "✗ rename failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(1)
    }
}

async fn remove(
    manager: &ContainerManager,
    container: &str,
    opts: &RemoveOptions,
) -> anyhow::Result<i32> {
    let result = manager.remove(container, opts).await?;
    if result.success {
        println!(
            "✓ {container}: removed {} history entries{}",
            result.entries_deleted,
            if result.container_removed {
                " and the container"
            } else {
                ""
            }
        );
        Ok(0)
    } else {
        println!(
            "✗ {container}: {}",
            result.error.as_deref().unwrap_or("remove failed")
        );
        Ok(1)
    }
}

async fn schedule(manager: Arc<ContainerManager>, mode: ScheduleMode) -> anyhow::Result<i32> {
    let (cron, containers, check_opts, update_opts, task) = match mode {
        ScheduleMode::Check {
            cron,
            containers,
            cleanup,
            notify,
        } => (
            cron,
            containers,
            CheckOptions {
                cleanup,
                notify,
                ..Default::default()
            },
            UpdateOptions::default(),
            ScheduledTask::Check,
        ),
        ScheduleMode::Update {
            cron,
            containers,
            force,
            notify,
        } => (
            cron,
            containers,
            CheckOptions::default(),
            UpdateOptions {
                force,
                notify,
                ..Default::default()
            },
            ScheduledTask::Update,
        ),
    };

    let scheduler = Scheduler::new(manager, containers, check_opts, update_opts, task);
    scheduler.run(&cron).await?;
    Ok(0)
}
