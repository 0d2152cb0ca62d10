//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{AssetsCommands, Cli, Commands, ConfigCommands, KindArg, SimulateArgs};

/// Print a command error and exit with a failure status.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({ "error": err.to_string(), "causes": chain });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
