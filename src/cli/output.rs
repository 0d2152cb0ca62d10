//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::env;

use crate::domain::models::{AssetKey, Location, NodeState, NodeView};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum number of characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    pub fn format_nodes(&self, nodes: &[NodeView]) -> String {
        let mut table = base_table();
        table.set_header(header(&["Node", "Definition", "State", "Exposures", "Iterations", "Units"]));

        for node in nodes {
            let state = if self.use_colors {
                Cell::new(node.state.as_str()).fg(state_color(node.state))
            } else {
                Cell::new(node.state.as_str())
            };
            let frozen = node.units.iter().filter(|u| u.frozen).count();
            table.add_row(vec![
                Cell::new(&node.id.to_string()[..8]),
                Cell::new(truncate(&node.definition.to_string(), 40)),
                state,
                Cell::new(node.exposure_count),
                Cell::new(node.iterations),
                Cell::new(format!("{frozen}/{}", node.units.len())),
            ]);
        }
        table.to_string()
    }

    pub fn format_assets(&self, assets: &[(AssetKey, Location)]) -> String {
        let mut table = base_table();
        table.set_header(header(&["Key", "Path", "URL", "Folder"]));
        for (key, location) in assets {
            table.add_row(vec![
                Cell::new(truncate(key.as_str(), 24)),
                Cell::new(truncate(&location.path, 48)),
                Cell::new(truncate(&location.url, 48)),
                Cell::new(if location.is_folder { "yes" } else { "no" }),
            ]);
        }
        table.to_string()
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

/// Check if terminal supports colors
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn state_color(state: NodeState) -> Color {
    match state {
        NodeState::Active => Color::Cyan,
        NodeState::Frozen => Color::Green,
        NodeState::Retired => Color::DarkGrey,
    }
}
