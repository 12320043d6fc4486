use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge this host to a declared catalog of resources", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/converge/config.toml)
    #[arg(long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage a single resource: apply properties, or show its current state
    ///
    /// Examples:
    ///   converge resource user bob                  # show bob
    ///   converge resource user bob ensure=present   # create bob
    ///   converge resource file /etc/motd content='hi' mode=0644
    Resource(ResourceArgs),

    /// Apply a catalog file (TOML or JSON)
    Apply(ApplyArgs),

    /// Show the order a catalog would be applied in, with its edges
    Graph {
        /// Catalog file
        catalog: PathBuf,
    },

    /// List resource types and their providers on this host
    Providers {
        /// Only this type
        #[arg(value_name = "TYPE")]
        type_name: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Resource / Apply arguments
// ============================================================================

#[derive(Args)]
pub struct ResourceArgs {
    /// Resource type (e.g., user, file, service)
    #[arg(value_name = "TYPE")]
    pub type_name: String,

    /// Resource title
    pub title: String,

    /// Properties as name=value; list values are comma-separated
    #[arg(value_name = "PROPERTY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Use this provider instead of the host default
    #[arg(long)]
    pub provider: Option<String>,

    #[command(flatten)]
    pub run: RunFlags,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Catalog file
    pub catalog: PathBuf,

    #[command(flatten)]
    pub run: RunFlags,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Flags shared by every command that applies resources
#[derive(Args, Clone, Copy)]
pub struct RunFlags {
    /// Report what would change without changing anything
    #[arg(short = 'n', long, overrides_with = "no_noop")]
    pub noop: bool,

    /// Make changes even if the config file sets noop
    #[arg(long, overrides_with = "noop")]
    pub no_noop: bool,

    /// Exit 2 on changes, 4 on failures, 6 on both
    #[arg(long)]
    pub detailed_exitcodes: bool,
}

impl RunFlags {
    /// Whether to run in noop mode, given the configured default
    pub fn noop(self, default: bool) -> bool {
        if self.noop {
            true
        } else if self.no_noop {
            false
        } else {
            default
        }
    }
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected PROPERTY=VALUE, got '{s}'")),
    }
}
