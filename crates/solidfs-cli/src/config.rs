use serde::{Deserialize, Serialize};
use solidfs_mount::MountConfig;
use solidfs_reduce::BuildOptions;
use std::path::Path;

/// Settings file for the `solidfs` binary. Command line flags override
/// the values loaded here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub build: BuildOptions,
    pub mount: MountConfig,
}

impl CliConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: CliConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: CliConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
