//! Configuration file parsing for Flotilla
//!
//! Parses `flotilla.toml` configuration files using serde

use crate::error::{Error, Result};
use crate::sickbay::MonitorConfig;
use crate::snapshot::SnapshotConfig;
use crate::warden::RecoveryConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Load configuration from a file
pub fn load(path: &Path) -> Result<FlotillaConfig> {
    let content = read(path)?;
    let config = from_str(&content)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Parse and validate in-memory TOML
pub fn from_str(content: &str) -> Result<FlotillaConfig> {
    let config: FlotillaConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and merge multiple configuration files
///
/// Files are merged in order, with later files overriding earlier ones.
/// Later files only override the keys they actually set.
pub fn load_merged(paths: &[PathBuf]) -> Result<FlotillaConfig> {
    if paths.is_empty() {
        return Err(Error::ConfigValidation("No configuration files provided".into()));
    }

    let mut merged = toml::Table::new();
    for path in paths {
        let table: toml::Table = toml::from_str(&read(path)?)?;
        merge_tables(&mut merged, table);
    }

    let config: FlotillaConfig = toml::Value::Table(merged).try_into()?;
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })
}

fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlotillaConfig {
    /// Failure detection
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Heartbeats and recovery attempts
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Snapshot retention
    #[serde(default)]
    pub snapshots: SnapshotConfig,
}

impl FlotillaConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;
        if monitor.timeout_ms == 0 {
            return Err(invalid("monitor.timeout_ms must be greater than zero"));
        }
        if monitor.tick_interval_ms == 0 {
            return Err(invalid("monitor.tick_interval_ms must be greater than zero"));
        }
        if monitor.history_capacity == 0 {
            return Err(invalid("monitor.history_capacity must be greater than zero"));
        }
        if monitor.subscriber_buffer == 0 {
            return Err(invalid("monitor.subscriber_buffer must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&monitor.battery_warning) {
            return Err(Error::ConfigValidation(format!(
                "monitor.battery_warning must be a percentage, got {}",
                monitor.battery_warning
            )));
        }

        let recovery = &self.recovery;
        if recovery.backoff_base_ms == 0 {
            return Err(invalid("recovery.backoff_base_ms must be greater than zero"));
        }
        if recovery.heartbeat_timeout_ms == 0 {
            return Err(invalid("recovery.heartbeat_timeout_ms must be greater than zero"));
        }
        if recovery.sweep_interval_ms == 0 {
            return Err(invalid("recovery.sweep_interval_ms must be greater than zero"));
        }
        if recovery.history_capacity == 0 {
            return Err(invalid("recovery.history_capacity must be greater than zero"));
        }
        let threshold = recovery.failed_fraction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::ConfigValidation(format!(
                "recovery.failed_fraction_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.snapshots.agent_capacity == 0 {
            return Err(invalid("snapshots.agent_capacity must be greater than zero"));
        }
        if self.snapshots.system_capacity == 0 {
            return Err(invalid("snapshots.system_capacity must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::ConfigValidation(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_empty_config() {
        let config = from_str("").unwrap();
        assert_eq!(config.monitor.timeout_ms, 5_000);
        assert_eq!(config.monitor.dedup_window_ms, 10_000);
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.recovery.backoff_base_ms, 2_000);
        assert_eq!(config.snapshots.agent_capacity, 10);
        assert_eq!(config.snapshots.system_capacity, 100);
        assert!(!config.snapshots.compress);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[monitor]
timeout_ms = 3000
dedup_window_ms = 6000
battery_warning = 15.0
history_capacity = 100
tick_interval_ms = 50
subscriber_buffer = 1024

[recovery]
max_attempts = 5
backoff_base_ms = 500
heartbeat_timeout_ms = 4000
sweep_interval_ms = 250
failed_fraction_threshold = 0.5
history_capacity = 50
shutdown_grace_ms = 1000
rollback_on_recovery = false

[snapshots]
agent_capacity = 4
system_capacity = 8
compress = true
"#;
        let config = from_str(toml).unwrap();
        assert_eq!(config.monitor.timeout_ms, 3_000);
        assert_eq!(config.monitor.missing_threshold_ms(), 6_000);
        assert_eq!(config.monitor.subscriber_buffer, 1024);
        assert_eq!(config.recovery.max_attempts, 5);
        assert!(!config.recovery.rollback_on_recovery);
        assert_eq!(config.snapshots.agent_capacity, 4);
        assert!(config.snapshots.compress);
    }

    #[test]
    fn test_validation_errors() {
        for toml in [
            "[snapshots]\nagent_capacity = 0",
            "[recovery]\nbackoff_base_ms = 0",
            "[recovery]\nfailed_fraction_threshold = 0.0",
            "[recovery]\nfailed_fraction_threshold = 1.5",
            "[monitor]\ntimeout_ms = 0",
            "[monitor]\nbattery_warning = 120.0",
            "[monitor]\nsubscriber_buffer = 0",
        ] {
            let err = from_str(toml).unwrap_err();
            assert!(matches!(err, Error::ConfigValidation(_)), "{}", toml);
        }
    }

    #[test]
    fn test_parse_error() {
        let err = from_str("[monitor]\ntimeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config("[recovery]\nmax_attempts = 7\n");
        let config = load(file.path()).unwrap();
        assert_eq!(config.recovery.max_attempts, 7);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_load_merged_overrides_only_set_keys() {
        let base = write_config("[recovery]\nmax_attempts = 4\nbackoff_base_ms = 100\n");
        let local = write_config("[recovery]\nmax_attempts = 9\n[snapshots]\ncompress = true\n");
        let config = load_merged(&[base.path().to_path_buf(), local.path().to_path_buf()]).unwrap();
        assert_eq!(config.recovery.max_attempts, 9);
        assert_eq!(config.recovery.backoff_base_ms, 100);
        assert!(config.snapshots.compress);
    }

    #[test]
    fn test_load_merged_requires_files() {
        assert!(matches!(load_merged(&[]), Err(Error::ConfigValidation(_))));
    }
}
