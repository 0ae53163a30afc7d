use erx_auth::AuthenticatorConfig;
use serde::{Deserialize, Serialize};

use crate::scenario::Scenario;

/// Simulator configuration: logging, prompt settings and the scenario to replay.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SimConfig {
    pub logging: LoggingConfig,
    pub authenticator: AuthenticatorConfig,
    pub scenario: Scenario,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.logging.level.trim().is_empty() {
            return Err("logging.level must not be empty".into());
        }
        self.authenticator
            .validate()
            .map_err(|e| format!("authenticator: {e}"))?;
        self.scenario.validate()?;
        Ok(())
    }
}

pub mod loader {
    use super::SimConfig;
    use anyhow::{Context, Result, anyhow};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_PATH: &str = "erx-sim.toml";

    pub fn load_config(path: Option<&Path>) -> Result<SimConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("config file not found: {}", p.display());
                }
                builder = builder.add_source(File::from(p.to_path_buf()));
            }
            None => {
                // Try default file in the working directory
                let default_path = PathBuf::from(DEFAULT_PATH);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., ERX_SIM__LOGGING__LEVEL=debug
        builder = builder.add_source(
            Environment::with_prefix("ERX_SIM")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build().context("config build error")?;
        let merged: SimConfig = cfg
            .try_deserialize()
            .context("config deserialize error")?;
        merged.validate().map_err(|e| anyhow!("invalid config: {e}"))?;
        Ok(merged)
    }
}
