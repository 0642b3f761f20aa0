use anyhow::Result;
use clap::Parser;

mod cli;
mod curate;
mod doctor;
mod init_cmd;
mod preflight;
mod report;
mod state_cmds;
mod up_cmd;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match &cli.command {
        Commands::Up(args) if args.verbose >= 2 => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init()
        .ok();

    match cli.command {
        Commands::Init { path } => {
            init_cmd::handle_init(&path)?;
        }
        Commands::Doctor => {
            doctor::handle_doctor()?;
        }
        Commands::Up(args) => {
            let exit_code = up_cmd::handle_up(args).await?;
            std::process::exit(exit_code);
        }
        Commands::Status => {
            state_cmds::handle_status()?;
        }
        Commands::Share => {
            state_cmds::handle_share()?;
        }
        Commands::Openapi { instance, print } => {
            state_cmds::handle_openapi(instance.as_deref(), print)?;
        }
        Commands::Down => {
            state_cmds::handle_down().await?;
        }
        Commands::Version => {
            println!("mcp-launch {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
