//! Implementation of the `trialnet config` commands.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::cli::types::ConfigCommands;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_else(|e| format!("<unrenderable config: {e}>"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

pub async fn execute(command: ConfigCommands, json_mode: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            output(&ConfigOutput { config }, json_mode);
        }
    }
    Ok(())
}
