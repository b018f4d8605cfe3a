//! Persistent OAuth state for the MCP inspector.
//!
//! Tokens and dynamically registered client credentials are kept per
//! inspector origin and target server, so reconnecting to the same server
//! reuses the same authorization.
//!
//! # Storage Location
//!
//! Records are stored in a platform-specific data directory:
//! - Linux: `~/.local/share/mcp-inspector/oauth.json`
//! - macOS: `~/Library/Application Support/mcp-inspector/oauth.json`
//! - Windows: `%APPDATA%/mcp-inspector/oauth.json`
//!
//! The file is created with restrictive permissions (0600 on Unix).
//!
//! # Example
//!
//! ```no_run
//! use inspector_auth::{token_key, OAuthRecord, StoredTokens, TokenStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TokenStore::new()?;
//!     let key = token_key("http://localhost:6274", "https://mcp.example.com/mcp");
//!
//!     let record = OAuthRecord {
//!         tokens: Some(StoredTokens::bearer("access-token")),
//!         ..Default::default()
//!     };
//!     store.set(&key, record).await?;
//!
//!     if let Some(record) = store.get(&key).await? {
//!         println!("stored client: {:?}", record.client);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod record;
mod storage;

pub use error::{AuthError, AuthResult};
pub use record::{OAuthClient, OAuthRecord, StoredTokens};
pub use storage::TokenStore;

/// Get the default token file path for the current platform.
///
/// Returns `None` if the data directory cannot be determined.
pub fn default_token_path() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|p| p.join("mcp-inspector").join("oauth.json"))
}

/// Build the storage key for a target server as seen from an inspector origin.
pub fn token_key(origin: &str, target: &str) -> String {
    format!("{}|{}", origin.trim_end_matches('/'), target)
}

/// Get the current time in seconds since Unix epoch.
pub fn current_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
