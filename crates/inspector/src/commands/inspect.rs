//! Commands that run against a live server.

use super::{parse_key_val, truncate};
use anyhow::{bail, Context};
use clap::Subcommand;
use inspector_mcp::{LoggingLevel, SessionManager};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

/// Tool subcommands.
#[derive(Subcommand)]
pub enum ToolCommands {
    /// List tools
    List {
        /// Pagination cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Call a tool
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

/// Resource subcommands.
#[derive(Subcommand)]
pub enum ResourceCommands {
    /// List resources
    List {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Read a resource
    Read {
        /// Resource URI
        uri: String,
    },
    /// List resource templates
    Templates {
        #[arg(long)]
        cursor: Option<String>,
    },
}

/// Prompt subcommands.
#[derive(Subcommand)]
pub enum PromptCommands {
    /// List prompts
    List {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Render a prompt
    Get {
        /// Prompt name
        name: String,
        /// Prompt argument as NAME=VALUE (repeatable)
        #[arg(short = 'a', long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_next_cursor(cursor: Option<&str>) {
    if let Some(cursor) = cursor {
        println!();
        println!("More results: --cursor {cursor}");
    }
}

pub async fn ping(manager: &SessionManager) -> anyhow::Result<()> {
    let started = Instant::now();
    manager.ping().await?;
    let name = manager
        .server_info()
        .await
        .map(|info| info.name)
        .unwrap_or_else(|| "server".to_string());
    println!("✓ {} responded in {} ms", name, started.elapsed().as_millis());
    Ok(())
}

pub async fn tools(manager: &SessionManager, command: ToolCommands) -> anyhow::Result<()> {
    match command {
        ToolCommands::List { cursor } => {
            let result = manager.list_tools(cursor.as_deref()).await?;
            if result.tools.is_empty() {
                println!("No tools.");
                return Ok(());
            }
            println!("{:<30} {}", "NAME", "DESCRIPTION");
            println!("{}", "-".repeat(80));
            for tool in &result.tools {
                let description = tool.description.as_deref().unwrap_or_default();
                println!("{:<30} {}", tool.name, truncate(description, 50));
            }
            print_next_cursor(result.next_cursor.as_deref());
        }
        ToolCommands::Call { name, args } => {
            let arguments: Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }
            // Loads output schemas so structured results are validated.
            manager.list_tools(None).await?;
            let result = manager.call_tool(&name, arguments).await?;
            print_json(&result)?;
            if result.is_error {
                bail!("Tool '{name}' reported an error");
            }
        }
    }
    Ok(())
}

pub async fn resources(manager: &SessionManager, command: ResourceCommands) -> anyhow::Result<()> {
    match command {
        ResourceCommands::List { cursor } => {
            let result = manager.list_resources(cursor.as_deref()).await?;
            if result.resources.is_empty() {
                println!("No resources.");
                return Ok(());
            }
            println!("{:<30} {}", "NAME", "URI");
            println!("{}", "-".repeat(80));
            for resource in &result.resources {
                println!("{:<30} {}", truncate(&resource.name, 29), resource.uri);
            }
            print_next_cursor(result.next_cursor.as_deref());
        }
        ResourceCommands::Read { uri } => {
            let result = manager.read_resource(&uri).await?;
            print_json(&result)?;
        }
        ResourceCommands::Templates { cursor } => {
            let result = manager.list_resource_templates(cursor.as_deref()).await?;
            if result.resource_templates.is_empty() {
                println!("No resource templates.");
                return Ok(());
            }
            println!("{:<30} {}", "NAME", "URI TEMPLATE");
            println!("{}", "-".repeat(80));
            for template in &result.resource_templates {
                println!(
                    "{:<30} {}",
                    truncate(&template.name, 29),
                    template.uri_template
                );
            }
            print_next_cursor(result.next_cursor.as_deref());
        }
    }
    Ok(())
}

pub async fn prompts(manager: &SessionManager, command: PromptCommands) -> anyhow::Result<()> {
    match command {
        PromptCommands::List { cursor } => {
            let result = manager.list_prompts(cursor.as_deref()).await?;
            if result.prompts.is_empty() {
                println!("No prompts.");
                return Ok(());
            }
            println!("{:<30} {:<24} {}", "NAME", "ARGUMENTS", "DESCRIPTION");
            println!("{}", "-".repeat(80));
            for prompt in &result.prompts {
                let arguments: Vec<String> = prompt
                    .arguments
                    .iter()
                    .map(|a| {
                        if a.required {
                            a.name.clone()
                        } else {
                            format!("[{}]", a.name)
                        }
                    })
                    .collect();
                println!(
                    "{:<30} {:<24} {}",
                    prompt.name,
                    truncate(&arguments.join(" "), 23),
                    truncate(prompt.description.as_deref().unwrap_or_default(), 30)
                );
            }
            print_next_cursor(result.next_cursor.as_deref());
        }
        PromptCommands::Get { name, args } => {
            let result = manager.get_prompt(&name, args.into_iter().collect()).await?;
            print_json(&result)?;
        }
    }
    Ok(())
}

pub async fn set_log_level(manager: &SessionManager, level: &str) -> anyhow::Result<()> {
    let level: LoggingLevel = level.parse().map_err(anyhow::Error::msg)?;
    if !manager.supports_logging().await {
        bail!("Server does not advertise the logging capability");
    }
    manager.set_logging_level(level).await?;
    println!("✓ Server log level set to {level}");
    Ok(())
}
