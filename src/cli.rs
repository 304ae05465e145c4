use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kbc-manage")]
#[command(version)]
#[command(about = "Declarative management of Keboola Management API resources", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Manifest describing the desired resources
    #[arg(long, global = true, env = "KBC_MANIFEST", default_value = "kbc.toml")]
    pub manifest: PathBuf,

    /// State file recording what is managed
    #[arg(long, global = true, env = "KBC_STATE", default_value = "kbc.state.json")]
    pub state: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(TargetArgs),

    /// Create, update or replace resources to match the manifest
    Apply(ApplyArgs),

    /// Delete managed resources
    Destroy(DestroyArgs),

    /// Refresh recorded state from the API without changing anything
    Refresh(TargetArgs),

    /// Adopt an existing remote object into state
    Import(ImportArgs),

    /// Print recorded state (secrets redacted)
    Show {
        /// Resource name (all when omitted)
        name: Option<String>,
    },

    /// Print the capability matrix of every resource type
    Types,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Only this resource (all when omitted)
    pub target: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Only this resource (all when omitted)
    pub target: Option<String>,

    /// Number of resources reconciled in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan and stop
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Only this resource (all when omitted)
    pub target: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Name to record the resource under
    pub name: String,

    /// Resource type, e.g. `project-feature`
    #[arg(value_name = "TYPE")]
    pub resource_type: String,

    /// Remote identifier, e.g. `123` or `123:queuev2`
    pub id: String,

    /// Extra field the identifier cannot carry (repeatable), e.g. `project_id=12`
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
