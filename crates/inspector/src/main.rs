//! mcp-inspector - inspect and debug Model Context Protocol servers.
//!
//! This is the main entry point for the mcp-inspector CLI.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::auth::AuthArgs;
use commands::inspect::{PromptCommands, ResourceCommands, ToolCommands};
use commands::session::Inspector;
use commands::TargetArgs;
use config::InspectorConfig;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "mcp-inspector")]
#[command(author, version, about = "Inspect and debug Model Context Protocol servers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to the log directory instead of stderr
    #[arg(long)]
    log_file: bool,

    /// Config file to use instead of the global and project files
    #[arg(long)]
    config: Option<PathBuf>,

    /// Answer sampling requests with a stub result instead of declining them
    #[arg(long)]
    approve_sampling: bool,

    /// Print every request and response after the command
    #[arg(long)]
    show_history: bool,

    /// Root URI offered to the server, e.g. file:///home/me/project (repeatable)
    #[arg(long = "root", value_name = "URI")]
    roots: Vec<String>,

    #[command(flatten)]
    target: TargetArgs,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,
    /// Check that the server responds
    Ping,
    /// List and call tools
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    /// List and read resources
    Resources {
        #[command(subcommand)]
        command: ResourceCommands,
    },
    /// List and render prompts
    Prompts {
        #[command(subcommand)]
        command: PromptCommands,
    },
    /// Set the server's log level
    LogLevel {
        /// debug, info, notice, warning, error, critical, alert or emergency
        level: String,
    },
    /// Authorize with an OAuth-protected server
    Auth(AuthArgs),
    /// Remove stored OAuth credentials for a server
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, sources) = match &cli.config {
        Some(path) => (
            InspectorConfig::load_explicit(path).await?,
            vec![path.clone()],
        ),
        None => InspectorConfig::load(&std::env::current_dir()?).await?,
    };

    let log_file =
        commands::logging::init_logging(cli.verbose, cli.log_file, config.log_level.as_deref());
    if let Some(path) = &log_file {
        debug!(path = %path.display(), "Logging to file");
    }
    debug!(sources = ?sources, "Loaded configuration");

    let command = match cli.command {
        Commands::Servers => {
            commands::servers::list_servers(&config, &sources);
            return Ok(());
        }
        Commands::Auth(args) => {
            let target = cli.target.resolve(&config)?;
            if args.debug {
                return commands::auth::debug(&target, &config, args).await;
            }
            return commands::auth::authorize(&target, &config).await;
        }
        Commands::Logout => {
            let target = cli.target.resolve(&config)?;
            return commands::auth::logout(&target, &config).await;
        }
        other => other,
    };

    let target = cli.target.resolve(&config)?;
    let inspector =
        Inspector::connect(&target, &config, cli.approve_sampling, &cli.roots).await?;
    let manager = inspector.manager();

    let result = match command {
        Commands::Ping => commands::inspect::ping(manager).await,
        Commands::Tools { command } => commands::inspect::tools(manager, command).await,
        Commands::Resources { command } => commands::inspect::resources(manager, command).await,
        Commands::Prompts { command } => commands::inspect::prompts(manager, command).await,
        Commands::LogLevel { level } => commands::inspect::set_log_level(manager, &level).await,
        Commands::Servers | Commands::Auth(_) | Commands::Logout => Ok(()),
    };

    inspector.finish(cli.show_history).await?;
    result
}
