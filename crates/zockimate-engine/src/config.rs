//! Runtime configuration. The binary assembles this from its flags, which
//! carry the `ZOCKIMATE_*` environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use zockimate_common::{Result, ZockimateError};

pub const DEFAULT_DB_PATH: &str = "zockimate.db";
pub const DEFAULT_RETENTION: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: PathBuf,
    pub apprise_url: Option<String>,
    /// Include stopped containers in listing and guards.
    pub all: bool,
    /// Skip the `zockimate.enable` management filter.
    pub no_filter: bool,
    /// Snapshots to keep per container.
    pub retention: usize,
    /// Default operation timeout.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            apprise_url: None,
            all: false,
            no_filter: false,
            retention: DEFAULT_RETENTION,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ZockimateError::Config(
                "database path cannot be empty".to_string(),
            ));
        }
        if self.retention < 1 {
            return Err(ZockimateError::Config(
                "retention must be at least 1".to_string(),
            ));
        }
        if self.timeout < Duration::from_secs(1) {
            return Err(ZockimateError::Config(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention, 10);
        assert_eq!(config.timeout, Duration::from_secs(180));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero_retention = Config {
            retention: 0,
            ..Default::default()
        };
        assert!(zero_retention.validate().is_err());

        let empty_db = Config {
            db_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(empty_db.validate().is_err());

        let zero_timeout = Config {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
