use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Zockimate - Docker container update manager with snapshot-protected rollback.
///
/// Enables automatic updates, rollbacks and monitoring of your Docker
/// containers. Containers opt in with the `zockimate.enable=true` label; an
/// optional `zockimate.zfs_dataset` label snapshots their data volume
/// alongside image and configuration.
#[derive(Debug, Parser)]
#[command(name = "zockimate", version, about, long_about = None)]
pub struct ZockimateArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ZOCKIMATE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Database path
    #[arg(short = 'D', long, env = "ZOCKIMATE_DB", default_value = "zockimate.db", global = true)]
    pub db: PathBuf,

    /// Apprise endpoint for notifications
    #[arg(short = 'a', long, env = "ZOCKIMATE_APPRISE_URL", global = true)]
    pub apprise_url: Option<String>,

    /// Include stopped containers
    #[arg(short = 'A', long, global = true)]
    pub all: bool,

    /// Don't filter on the zockimate.enable label
    #[arg(short = 'N', long, global = true)]
    pub no_filter: bool,

    /// Number of snapshots to retain per container
    #[arg(long, env = "ZOCKIMATE_RETENTION", default_value_t = 10, global = true)]
    pub retention: usize,

    /// Operation timeout in seconds
    #[arg(long, env = "ZOCKIMATE_TIMEOUT", default_value_t = 180, value_name = "SECONDS", global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check containers for available updates (exit code 1 when one is found)
    Check {
        /// Containers to check; all managed containers when omitted
        containers: Vec<String>,

        /// Remove the pulled image again when an update was detected
        #[arg(short = 'c', long)]
        cleanup: bool,

        /// Notify when an update is available
        #[arg(long)]
        notify: bool,
    },

    /// Update containers to their latest image versions
    Update {
        /// Containers to update; all managed containers when omitted
        containers: Vec<String>,

        /// Recreate even when no newer image exists
        #[arg(short, long)]
        force: bool,

        /// Show what would be updated without doing it
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Notify on success and failure
        #[arg(long)]
        notify: bool,
    },

    /// Capture snapshots of containers
    Save {
        /// Containers to snapshot; all managed containers when omitted
        containers: Vec<String>,

        /// Annotation stored with the snapshot
        #[arg(short, long, default_value = "Manual snapshot")]
        message: String,

        /// Snapshot stopped containers too
        #[arg(short, long)]
        force: bool,

        /// Show what would be captured without doing it
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Roll a container back to a snapshot
    ///
    /// Without aspect flags every aspect (image, data, config) is restored.
    Rollback {
        container: String,

        /// Snapshot id; the most recent one when omitted
        snapshot_id: Option<i64>,

        /// Restore the image
        #[arg(short = 'i', long)]
        image: bool,

        /// Roll the ZFS dataset back
        #[arg(short = 'd', long)]
        data: bool,

        /// Restore the engine configuration
        #[arg(short = 'c', long)]
        config: bool,

        /// Allow an image rollback without an exact version pin
        #[arg(short, long)]
        force: bool,

        /// Notify on success
        #[arg(long)]
        notify: bool,
    },

    /// Show snapshot history
    History {
        /// Restrict to these containers
        containers: Vec<String>,

        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,

        /// Only the most recent entry per container
        #[arg(long)]
        last: bool,

        /// Sort order
        #[arg(long, value_enum, default_value_t = SortField::Date)]
        sort_by: SortField,

        /// JSON output
        #[arg(long)]
        json: bool,

        /// Substring search over message and status
        #[arg(long)]
        search: Option<String>,

        /// Entries at or after this time (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        since: Option<String>,

        /// Entries at or before this time (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        before: Option<String>,
    },

    /// Rename a container in the engine and in the snapshot history
    Rename {
        old_name: String,
        new_name: String,

        /// Only rewrite the database, leave the engine container alone
        #[arg(long)]
        db_only: bool,
    },

    /// Remove snapshot entries of a container
    Remove {
        container: String,

        /// Remove every entry
        #[arg(long)]
        all: bool,

        /// Remove entries before this time (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        before: Option<String>,

        /// Remove entries older than this duration (e.g. 720h)
        #[arg(long, value_name = "DURATION")]
        older_than: Option<String>,

        /// Also stop and remove the engine container
        #[arg(long)]
        with_container: bool,

        /// Remove entries even though the engine container still exists
        #[arg(short, long)]
        force: bool,

        /// Also destroy the ZFS snapshots behind the removed entries
        #[arg(long)]
        zfs: bool,

        /// Show what would be removed without doing it
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Run recurring checks or updates on a cron schedule
    Schedule {
        #[command(subcommand)]
        mode: ScheduleMode,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScheduleMode {
    /// Periodically check for updates
    Check {
        /// Cron expression (five fields, UTC)
        #[arg(long, default_value = "0 4 * * *")]
        cron: String,

        /// Containers to check; all managed containers when omitted
        containers: Vec<String>,

        /// Remove pulled images after positive checks
        #[arg(short = 'c', long)]
        cleanup: bool,

        /// Notify when updates are available
        #[arg(long)]
        notify: bool,
    },

    /// Periodically apply updates
    Update {
        /// Cron expression (five fields, UTC)
        #[arg(long, default_value = "0 4 * * *")]
        cron: String,

        /// Containers to update; all managed containers when omitted
        containers: Vec<String>,

        /// Recreate even when no newer image exists
        #[arg(short, long)]
        force: bool,

        /// Notify on success and failure
        #[arg(long)]
        notify: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortField {
    Date,
    Container,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        ZockimateArgs::command().debug_assert();
    }

    #[test]
    fn rollback_accepts_positional_snapshot_and_aspect_flags() {
        let args =
            ZockimateArgs::parse_from(["zockimate", "rollback", "web", "42", "-i", "-d", "-c"]);
        match args.command {
            Command::Rollback {
                container,
                snapshot_id,
                image,
                data,
                config,
                force,
                ..
            } => {
                assert_eq!(container, "web");
                assert_eq!(snapshot_id, Some(42));
                assert!(image && data && config);
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn env_style_globals_work_after_the_subcommand() {
        let args = ZockimateArgs::parse_from(["zockimate", "update", "web", "-A", "--retention", "5"]);
        assert!(args.all);
        assert_eq!(args.retention, 5);
    }
}
