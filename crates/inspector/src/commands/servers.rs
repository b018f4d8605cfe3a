//! Configured server listing.

use super::truncate;
use crate::config::InspectorConfig;
use std::path::PathBuf;

pub fn list_servers(config: &InspectorConfig, sources: &[PathBuf]) {
    if config.servers.is_empty() {
        println!("No MCP servers configured.");
        if let Some(dir) = InspectorConfig::global_config_dir() {
            println!();
            println!("Add servers to {}", dir.join("config.json").display());
            println!("or to inspector.json in the current directory.");
        }
        return;
    }

    println!("{:<20} {:<16} {}", "NAME", "TRANSPORT", "ENDPOINT");
    println!("{}", "-".repeat(70));
    for (name, entry) in &config.servers {
        let server = entry.to_server_config(name);
        println!(
            "{:<20} {:<16} {}",
            name,
            server.kind().as_str(),
            truncate(&server.endpoint(), 40)
        );
    }

    if !sources.is_empty() {
        println!();
        for source in sources {
            println!("from {}", source.display());
        }
    }
}
