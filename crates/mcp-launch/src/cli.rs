use clap::{Parser, Subcommand};
use mcpl_core::types::TunnelMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcp-launch", version)]
#[command(about = "Supervise MCP stacks: gateway, merged OpenAPI, optional tunnel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter mcp.config.json
    Init {
        /// Where to write the starter config
        #[arg(long, default_value = "mcp.config.json")]
        path: PathBuf,
    },

    /// Check required binaries and the local environment
    Doctor,

    /// Launch one stack per config file
    Up(UpArgs),

    /// Show stacks recorded by the last `up`
    Status,

    /// Print paste-ready URLs and API keys for recorded stacks
    Share,

    /// Show the last merged OpenAPI artifact per stack
    Openapi {
        /// Limit to one instance
        #[arg(long)]
        instance: Option<String>,

        /// Print document contents instead of the artifact path
        #[arg(long)]
        print: bool,
    },

    /// Best-effort teardown of stacks recorded by the last `up`
    Down,

    /// Print version information
    Version,
}

#[derive(clap::Args)]
pub struct UpArgs {
    /// Config file; repeat for one stack per file (default: mcp.config.json)
    #[arg(long = "config")]
    pub configs: Vec<PathBuf>,

    /// Base front-proxy port; instance i reserves >= port+i
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Base gateway port; same reservation scheme
    #[arg(long = "mcpo-port", default_value_t = 8800)]
    pub mcpo_port: u16,

    /// Explicit API key applied to every instance
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// One generated key shared by all instances instead of per-instance keys
    #[arg(long = "shared-key")]
    pub shared_key: bool,

    /// Tunnel mode
    #[arg(long, value_enum, default_value_t = TunnelMode::Quick)]
    pub tunnel: TunnelMode,

    /// Externally-visible origin for merged servers[0].url; repeat per instance
    #[arg(long = "public-url")]
    pub public_urls: Vec<String>,

    /// Named-tunnel identifier for --tunnel named
    #[arg(long = "tunnel-name")]
    pub tunnel_name: Option<String>,

    /// Run the interactive preflight curation before launch
    #[arg(long)]
    pub tui: bool,

    /// Stream child stdio (-v); -vv additionally enables debug logging
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Stream child stdio regardless of verbosity
    #[arg(long)]
    pub stream: bool,

    /// Tee all tagged child output to a file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}
