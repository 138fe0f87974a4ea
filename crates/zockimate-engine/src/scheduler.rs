//! Cron-driven recurring checks and updates.
//!
//! The loop sleeps until the next scheduled instant, runs the batch inline,
//! and goes back to sleep. SIGINT/SIGTERM stop the ticker; an in-flight
//! batch always finishes naturally so a recreate is never abandoned
//! half-done.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use zockimate_common::options::{CheckOptions, UpdateOptions};
use zockimate_common::{Result, ZockimateError};

use crate::manager::ContainerManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    Check,
    Update,
}

pub struct Scheduler {
    manager: Arc<ContainerManager>,
    containers: Vec<String>,
    check_opts: CheckOptions,
    update_opts: UpdateOptions,
    task: ScheduledTask,
}

impl Scheduler {
    pub fn new(
        manager: Arc<ContainerManager>,
        containers: Vec<String>,
        check_opts: CheckOptions,
        update_opts: UpdateOptions,
        task: ScheduledTask,
    ) -> Self {
        Self {
            manager,
            containers,
            check_opts,
            update_opts,
            task,
        }
    }

    /// Parses a cron expression. Classic five-field expressions get a
    /// seconds field prepended, since the parser wants one.
    pub fn parse_schedule(expr: &str) -> Result<Schedule> {
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        Schedule::from_str(&normalized)
            .map_err(|e| ZockimateError::Config(format!("invalid cron expression {expr:?}: {e}")))
    }

    /// Runs the schedule until SIGINT or SIGTERM arrives.
    pub async fn run(&self, cron_expr: &str) -> Result<()> {
        let schedule = Self::parse_schedule(cron_expr)?;
        info!(cron = cron_expr, "starting scheduler");

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ZockimateError::Config(format!("failed to install signal handler: {e}")))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ZockimateError::Config(format!("failed to install signal handler: {e}")))?;

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next, "next scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(delay) => self.run_once().await,
                _ = sigterm.recv() => {
                    info!("received SIGTERM, stopping scheduler");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, stopping scheduler");
                    break;
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// One scheduled tick over the configured (or discovered) name set.
    pub async fn run_once(&self) {
        let containers = if self.containers.is_empty() {
            match self.manager.get_containers().await {
                Ok(containers) => containers,
                Err(e) => {
                    error!(error = %e, "failed to list containers");
                    return;
                }
            }
        } else {
            self.containers.clone()
        };

        if containers.is_empty() {
            info!("no containers to process");
            return;
        }

        match self.task {
            ScheduledTask::Check => self.run_checks(&containers).await,
            ScheduledTask::Update => self.run_updates(&containers).await,
        }
    }

    async fn run_checks(&self, containers: &[String]) {
        let mut updates = 0usize;
        for name in containers {
            match self.manager.check(name, &self.check_opts).await {
                Ok(result) if result.needs_update => {
                    updates += 1;
                    info!(
                        container = %name,
                        current = %result.current_image,
                        latest = %result.update_image,
                        "update available"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(container = %name, error = %e, "failed to check container"),
            }
        }
        if updates == 0 {
            info!("all containers are up to date");
        }
    }

    async fn run_updates(&self, containers: &[String]) {
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for name in containers {
            match self.manager.update(name, &self.update_opts).await {
                Ok(result) if result.success => {
                    succeeded += 1;
                    info!(container = %name, "successfully processed container");
                }
                Ok(result) => {
                    failed += 1;
                    error!(
                        container = %name,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "failed to update container"
                    );
                }
                Err(e) => {
                    failed += 1;
                    error!(container = %name, error = %e, "failed to update container");
                }
            }
        }
        info!(succeeded, failed, "scheduled update run finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_are_accepted() {
        let schedule = Scheduler::parse_schedule("*/5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert!(Scheduler::parse_schedule("0 30 4 * * *").is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Scheduler::parse_schedule("whenever").is_err());
        assert!(Scheduler::parse_schedule("61 * * * *").is_err());
    }
}
