use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use kiln_types::Accelerator;

use crate::error::CoreError;

/// The daemon configuration record, stored as TOML at `<root>/config`.
///
/// Every field has a default so a missing record is simply written out on
/// first start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Host the API server binds and the CLI talks to.
    pub api_server_host: String,
    pub api_server_port: u16,
    /// Line budget handed to the log sink.
    pub max_log_lines: usize,
    /// Overrides accelerator detection when set (e.g. `"cuda-12.4"`).
    pub accelerator: Option<Accelerator>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_server_host: "127.0.0.1".to_owned(),
            api_server_port: 3928,
            max_log_lines: 100_000,
            accelerator: None,
        }
    }
}

impl DaemonConfig {
    /// Read the record at `path`, creating it with defaults when absent.
    pub fn load_or_create(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&text)?)
        } else {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "wrote default configuration record");
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `host:port` of the API server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.api_server_host, self.api_server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let config = DaemonConfig::load_or_create(&path).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(path.exists());

        // And reading it back yields the same record.
        let again = DaemonConfig::load_or_create(&path).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn record_round_trips_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let config = DaemonConfig {
            api_server_port: 4000,
            accelerator: Some(Accelerator::Cuda {
                major: 12,
                minor: 4,
            }),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let back = DaemonConfig::load_or_create(&path).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.server_addr(), "127.0.0.1:4000");
    }
}
