use std::path::PathBuf;

use clap::{Parser, Subcommand};
use erx_sim::output::OutputFormat;

#[derive(Parser)]
#[command(name = "erx-sim")]
#[command(about = "Replay e-prescription authentication scenarios against scripted collaborators")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Scenario file (defaults to ./erx-sim.toml)
    #[arg(short, long, global = true, env = "ERX_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scenario and print every state transition
    Run,
    /// Validate the scenario file without running it
    Check,
    /// List the scripted insurance providers
    Providers,
}
