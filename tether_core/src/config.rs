use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::session::SessionConfig;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GeneratorSettings {
    /// Path to the generator binary, invoked as `<binary> [args..] -o <out>`.
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Bound on each phase of the post-TERMINATE wait for subprocess exit.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    1000
}

impl GeneratorSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            binary: self.binary.clone(),
            args: self.args.clone(),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    pub generator: GeneratorSettings,
}

impl TetherConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: TetherConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
