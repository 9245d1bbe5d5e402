//! Command-line interface for multihome.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// multihome - multi-homed egress source manager
#[derive(Parser, Debug)]
#[command(
    name = "multihome",
    author,
    version,
    about = "Discover, verify and route through every network egress path of a host",
    long_about = r#"
multihome keeps an authoritative set of healthy egress sources (network
interfaces) and lets an administrator decide which source serves which
destination:

  - Periodic discovery and connectivity checks of every interface
  - Live dial failures trigger immediate re-validation
  - Block, reserve, avoid and sticky policies over a JSON API

QUICK START:
  Daemon:   multihome run
  Inspect:  multihome sources
  Policy:   multihome policies block eth1 --reason "metered"
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Management API address used by client commands
    #[arg(long, global = true, default_value = "http://127.0.0.1:4884")]
    pub api: String,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the source listener and management API
    Run(RunArgs),

    /// List active sources of a running daemon
    Sources,

    /// Manage policies of a running daemon
    #[command(subcommand)]
    Policies(PolicyCommand),

    /// List local network interfaces as discovery sees them
    Interfaces(InterfacesArgs),

    /// Check connectivity through one interface
    Check(CheckArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only consider these interfaces (can be specified multiple times)
    #[arg(short, long)]
    pub interface: Vec<String>,

    /// Poll interval override (e.g. "3s")
    #[arg(long)]
    pub poll_interval: Option<humantime_serde::re::humantime::Duration>,

    /// Do not serve the management API
    #[arg(long)]
    pub no_api: bool,
}

/// Policy subcommands
#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// List policies
    List,

    /// Never use a source
    Block(PolicyArgs),

    /// Use a source only for a target
    Reserve(TargetPolicyArgs),

    /// Do not use a source for a target
    Avoid(TargetPolicyArgs),

    /// Keep serving each destination through the same source
    Sticky(StickyArgs),

    /// Delete a policy by id
    Delete {
        /// Policy id
        id: String,
    },
}

/// Arguments shared by policy creation commands
#[derive(Args, Debug)]
pub struct PolicyArgs {
    /// Source name
    pub source: String,

    /// Human-readable reason
    #[arg(short, long, default_value = "")]
    pub reason: String,

    /// Issuer recorded on the policy
    #[arg(long, default_value = "cli")]
    pub issuer: String,
}

/// Policy creation with a destination
#[derive(Args, Debug)]
pub struct TargetPolicyArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Destination (host or host:port)
    pub target: String,
}

/// Sticky policy arguments
#[derive(Args, Debug)]
pub struct StickyArgs {
    /// Issuer the affinity applies to
    pub issuer: String,

    /// Restrict to one destination
    #[arg(short, long, default_value = "")]
    pub target: String,

    /// Human-readable reason
    #[arg(short, long, default_value = "")]
    pub reason: String,
}

/// Interfaces command arguments
#[derive(Args, Debug)]
pub struct InterfacesArgs {
    /// Include interfaces discovery would skip
    #[arg(short, long)]
    pub all: bool,
}

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Interface name
    pub interface: String,

    /// Skip the live probe
    #[arg(long)]
    pub low: bool,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Shell type for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
