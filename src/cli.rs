use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warren")]
#[command(version)]
#[command(about = "Declarative RabbitMQ vhosts, users, exchanges, queues and bindings", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Tracked state file [default: ~/.local/state/warren/state.toml]
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Default)]
pub struct ConnectionArgs {
    /// Connection config file [default: ~/.config/warren/config.toml]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Management API endpoint, e.g. http://localhost:15672
    #[arg(long, global = true, env = "RABBITMQ_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Management API user
    #[arg(long, global = true, env = "RABBITMQ_USERNAME")]
    pub username: Option<String>,

    /// Management API password
    #[arg(long, global = true, env = "RABBITMQ_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Make the broker match the desired-state file
    Apply(ApplyArgs),

    /// Delete everything in the tracked state
    Destroy(DestroyArgs),

    /// Check that every tracked object exists on the broker
    Verify(VerifyArgs),

    /// Inspect tracked state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    /// Desired-state file (TOML)
    pub file: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Desired-state file (TOML)
    pub file: PathBuf,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Verify
// ============================================================================

#[derive(Args)]
pub struct VerifyArgs {
    /// Number of parallel checks
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List tracked instances
    List,

    /// Show one tracked instance
    Show {
        /// Instance address, e.g. binding.test
        address: String,
    },
}
