//! Logging initialization.
//!
//! Command results go to stdout, so logs go to stderr, or to a file in the
//! platform log directory when requested.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERBOSE_FILTER: &str = "mcp_inspector=debug,inspector_mcp=debug,inspector_auth=debug";
const DEFAULT_FILTER: &str = "mcp_inspector=info,inspector_mcp=warn,inspector_auth=warn";

/// Initialize logging.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// Returns the log file path when logging to a file.
pub fn init_logging(verbose: bool, to_file: bool, configured: Option<&str>) -> Option<PathBuf> {
    let fallback = if verbose {
        VERBOSE_FILTER
    } else {
        configured.unwrap_or(DEFAULT_FILTER)
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return None;
    }

    let log_dir = get_log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {e}");
        return None;
    }

    let log_file = log_dir.join("mcp-inspector.log");
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            return None;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(file)
        .init();

    Some(log_file)
}

/// Get the log directory path.
pub fn get_log_dir() -> PathBuf {
    // macOS: ~/Library/Logs/mcp-inspector
    // Linux: ~/.local/state/mcp-inspector/logs
    // Windows: %LOCALAPPDATA%/mcp-inspector/logs

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library/Logs/mcp-inspector");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(state_dir) = dirs::state_dir() {
            return state_dir.join("mcp-inspector/logs");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".local/state/mcp-inspector/logs");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app) = dirs::data_local_dir() {
            return local_app.join("mcp-inspector/logs");
        }
    }

    PathBuf::from(".mcp-inspector/logs")
}
