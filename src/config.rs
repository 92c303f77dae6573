//! Settings read from the TOML config file.

use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use crate::backends::dump::DumpSettings;
use crate::mariadb::{RecoverySettings, ServerTarget, ToolsConfig};

/// Configuration of all backup stages.
///
/// Every section is optional, missing values fall back to their defaults.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Server to back up. The password is never stored here.
    pub server: ServerTarget,
    pub dump: DumpSettings,
    pub recovery: RecoverySettings,
    pub tools: ToolsConfig,
    pub schemas: SchemasConfig,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchemasConfig {
    /// Schemas never backed up, in addition to the system schemas.
    pub exclude: Vec<String>,
}

#[derive(Debug, Display, Error)]
/// Errors on loading the [GuardConfig].
pub enum ConfigError {
    /// The config file exists but can't be read.
    #[display("Reading {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    /// The config file is not valid.
    #[display("Parsing {} failed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl GuardConfig {
    /// Loads the config at `path`.
    ///
    /// A missing file is created with the defaults. Failing to write it is
    /// only logged.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(config_str) => toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                if let Err(e) = default_config.write(path) {
                    log::warn!("Writing default config to {} failed: {e}", path.display());
                }
                Ok(default_config)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write(&self, path: &Path) -> io::Result<()> {
        let config_str = toml::to_string_pretty(self).map_err(io::Error::other)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, config_str)
    }
}
