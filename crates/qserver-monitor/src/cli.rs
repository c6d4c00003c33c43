//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Watch a bluesky queue server: connection state, status, allowed plans.
#[derive(Parser, Debug)]
#[command(name = "qserver-monitor", version, about, propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Queue server HTTP URL (e.g. http://localhost:60610)
    #[arg(short = 'u', long, global = true, env = "QSERVER_URL")]
    pub url: Option<String>,

    /// API key, sent as `Authorization: ApiKey <key>`
    #[arg(short = 'k', long, global = true, env = "QSERVER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Accept self-signed TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the connection and print every state and status change
    Watch(WatchArgs),

    /// Fetch the current status once and print it as JSON
    Status,

    /// List the plans the server allows
    Plans(PlansArgs),

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Poll over HTTP instead of subscribing to the status WebSocket
    #[arg(long)]
    pub poll: bool,

    /// Poll period in milliseconds (with --poll)
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Emit one JSON object per line instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PlansArgs {
    /// Print the full plan metadata as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration (file + environment + flags)
    Show,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}
