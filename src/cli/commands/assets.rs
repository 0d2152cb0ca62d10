//! Implementation of the `trialnet assets` commands.

use anyhow::{Context, Result};
use serde::Serialize;

use super::open_registry;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::types::AssetsCommands;
use crate::domain::models::{AssetKey, Location};
use crate::domain::ports::AssetRegistry;
use crate::infrastructure::config::ConfigLoader;

#[derive(Debug, Serialize)]
pub struct AssetEntry {
    pub key: AssetKey,
    #[serde(flatten)]
    pub location: Location,
}

#[derive(Debug, Serialize)]
pub struct AssetListOutput {
    pub assets: Vec<AssetEntry>,
    pub total: usize,
}

impl CommandOutput for AssetListOutput {
    fn to_human(&self) -> String {
        if self.assets.is_empty() {
            return "No persisted assets.".to_string();
        }
        let rows: Vec<(AssetKey, Location)> = self
            .assets
            .iter()
            .map(|a| (a.key.clone(), a.location.clone()))
            .collect();
        let mut rendered = TableFormatter::new().format_assets(&rows);
        if self.total > self.assets.len() {
            rendered.push_str(&format!("\nShowing {} of {} assets", self.assets.len(), self.total));
        }
        rendered
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: AssetsCommands, json_mode: bool) -> Result<()> {
    match command {
        AssetsCommands::List { limit } => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            let registry = open_registry(&config).await?;
            let all = registry.list().await.context("Failed to list assets")?;
            let total = all.len();
            let assets = all
                .into_iter()
                .take(limit)
                .map(|(key, location)| AssetEntry { key, location })
                .collect();
            output(&AssetListOutput { assets, total }, json_mode);
        }
    }
    Ok(())
}
