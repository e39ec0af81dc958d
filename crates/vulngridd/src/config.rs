//! vulngridd.toml configuration.
//!
//! Every field is optional in the file; missing ones take the defaults
//! below. Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use vulngrid_updater::{DEFAULT_UPDATE_INTERVAL, UpdaterConfig};

pub const DEFAULT_LOG_FILTER: &str = "info,vulngridd=debug,vulngrid_updater=debug";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the redb database.
    pub data_dir: PathBuf,
    /// Seconds between two reconciliation cycles.
    pub update_interval_secs: u64,
    /// Master switch for active component tracking.
    pub active_vuln_mgmt: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/vulngrid"),
            update_interval_secs: DEFAULT_UPDATE_INTERVAL.as_secs(),
            active_vuln_mgmt: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Apply command-line flags on top of file values.
    pub fn with_overrides(
        mut self,
        data_dir: Option<PathBuf>,
        interval_secs: Option<u64>,
        disable_active_vuln_mgmt: bool,
    ) -> anyhow::Result<Self> {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        if let Some(interval_secs) = interval_secs {
            self.update_interval_secs = interval_secs;
        }
        if disable_active_vuln_mgmt {
            self.active_vuln_mgmt = false;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.update_interval_secs == 0 {
            anyhow::bail!("update_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vulngrid.redb")
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            active_vuln_mgmt: self.active_vuln_mgmt,
            interval: Duration::from_secs(self.update_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(config.updater_config().active_vuln_mgmt);
        assert_eq!(config.updater_config().interval, DEFAULT_UPDATE_INTERVAL);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
data_dir = "/tmp/vulngrid"
active_vuln_mgmt = false
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/vulngrid/vulngrid.redb"));
        assert!(!config.active_vuln_mgmt);
        assert_eq!(config.update_interval_secs, DEFAULT_UPDATE_INTERVAL.as_secs());
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let file: DaemonConfig = toml::from_str("update_interval_secs = 30").unwrap();

        let untouched = file.clone().with_overrides(None, None, false).unwrap();
        assert_eq!(untouched, file);

        let config = file
            .with_overrides(Some(PathBuf::from("/data")), Some(5), true)
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.update_interval_secs, 5);
        assert!(!config.updater_config().active_vuln_mgmt);
    }

    #[test]
    fn test_zero_interval_override_rejected() {
        let err = DaemonConfig::default()
            .with_overrides(None, Some(0), false)
            .unwrap_err();
        assert!(err.to_string().contains("update_interval_secs"));
    }

    #[test]
    fn test_zero_interval_in_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vulngridd.toml");
        std::fs::write(&path, "update_interval_secs = 0").unwrap();

        let err = DaemonConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("update_interval_secs must be greater than zero"));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vulngridd.toml");
        let config = DaemonConfig {
            update_interval_secs: 5,
            ..DaemonConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(DaemonConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
