//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::models::TrialKind;

#[derive(Parser)]
#[command(name = "trialnet")]
#[command(about = "trialnet - trial distribution and convergence engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a synthetic episode with concurrent bot participants
    Simulate(SimulateArgs),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Persistent asset registry commands
    #[command(subcommand)]
    Assets(AssetsCommands),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Trial kind; overrides `task.trial_kind`
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Number of synthetic nodes (ignored with --stimuli)
    #[arg(short, long, default_value = "10")]
    pub nodes: usize,

    /// Number of concurrent bot participants
    #[arg(short, long, default_value = "8")]
    pub participants: usize,

    /// Directory of stimulus files, one node per file
    #[arg(long)]
    pub stimuli: Option<PathBuf>,

    /// Stimulus file extension used with --stimuli
    #[arg(long, default_value = "wav")]
    pub extension: String,

    /// Build one node per ordered pair of stimuli
    #[arg(long, requires = "stimuli")]
    pub pairwise: bool,

    /// Seed for node tie-breaking and bot behaviour
    #[arg(long)]
    pub seed: Option<u64>,

    /// Probability that a bot trial fails analysis
    #[arg(long, default_value = "0.0")]
    pub failure_rate: f64,

    /// Probability that a bot abandons its trial
    #[arg(long, default_value = "0.0")]
    pub abandon_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Rating,
    Tapping,
    StepTag,
    TimedButton,
    Choice,
}

impl From<KindArg> for TrialKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Rating => Self::Rating,
            KindArg::Tapping => Self::Tapping,
            KindArg::StepTag => Self::StepTag,
            KindArg::TimedButton => Self::TimedButton,
            KindArg::Choice => Self::Choice,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the merged configuration
    Show,
}

#[derive(Subcommand)]
pub enum AssetsCommands {
    /// List persisted assets
    List {
        /// Maximum number of assets to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}
