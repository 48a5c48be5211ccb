use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cutover")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Shift traffic between environments phase by phase", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/cutover/config.toml)
    #[arg(long, global = true, env = "CUTOVER_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile and run a cutover request
    Execute(ExecuteArgs),

    /// Validate a request and print its phases without running it
    Plan {
        /// Path to the request JSON
        request: PathBuf,
    },

    /// Show a plan's report from the ledger journal
    Show {
        /// Plan id (plan-xxxxxxxxxxxx)
        plan_id: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List journaled plans with their last known state
    List,

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ExecuteArgs {
    /// Path to the request JSON
    pub request: PathBuf,

    /// Simulate every provider call; nothing is changed
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Approve gated plans without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Name recorded on the approval
    #[arg(long, env = "USER", default_value = "cli")]
    pub approver: String,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration and where it came from
    Show,

    /// Print the config file path
    Path,
}
