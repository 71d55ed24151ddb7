use std::path::{Path, PathBuf};

use migrata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigrataConfig;

/// Looked up in the working directory when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "migrata.toml";

/// Values that take precedence over the config file, typically from CLI flags
/// or environment variables.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub encryption_key: Option<String>,
    pub dir: Option<PathBuf>,
    pub table: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path`, or from `migrata.toml` in `base_dir` if it exists,
    /// falling back to defaults. An explicit path that does not exist is an
    /// error; a missing default file is not.
    pub fn load(path: Option<&Path>, base_dir: &Path) -> Result<MigrataConfig> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let default_path = base_dir.join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::load_file(&default_path)
                } else {
                    debug!("no {CONFIG_FILE_NAME} found, using defaults");
                    Ok(MigrataConfig::default())
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<MigrataConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: MigrataConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_overrides(mut config: MigrataConfig, overrides: ConfigOverrides) -> MigrataConfig {
        if overrides.url.is_some() {
            config.database.url = overrides.url;
        }
        if overrides.auth_token.is_some() {
            config.database.auth_token = overrides.auth_token;
        }
        if overrides.encryption_key.is_some() {
            config.database.encryption_key = overrides.encryption_key;
        }
        if let Some(dir) = overrides.dir {
            config.migrations.dir = dir;
        }
        if let Some(table) = overrides.table {
            config.migrations.table = table;
        }
        config
    }
}
