use super::schema::DeskpilotConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from an explicit path when given, otherwise from default locations:
    /// 1. ./deskpilot.yaml
    /// 2. ~/.deskpilot/config.yaml
    /// 3. Default configuration
    pub async fn load(explicit: Option<&Path>) -> Result<DeskpilotConfig, ConfigError> {
        match explicit {
            Some(path) => Self::load_from(path).await,
            None => Self::load_default().await,
        }
    }

    pub async fn load_default() -> Result<DeskpilotConfig, ConfigError> {
        let local_config = PathBuf::from("./deskpilot.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".deskpilot").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(DeskpilotConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<DeskpilotConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: DeskpilotConfig = serde_yaml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}
