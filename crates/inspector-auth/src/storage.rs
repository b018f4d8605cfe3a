//! File-backed token store.

use crate::error::{AuthError, AuthResult};
use crate::record::OAuthRecord;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Persistent store of OAuth records keyed by `origin|target`.
///
/// Reads are served from an in-memory cache that is invalidated on every
/// write. Writes are serialized so concurrent updates to different keys
/// do not overwrite each other.
pub struct TokenStore {
    path: PathBuf,
    cache: RwLock<Option<HashMap<String, OAuthRecord>>>,
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Create a store using the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn new() -> AuthResult<Self> {
        let path = crate::default_token_path().ok_or(AuthError::NoDataDir)?;
        Ok(Self::with_path(path))
    }

    /// Create a store backed by a custom file.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get the record stored under `key`.
    pub async fn get(&self, key: &str) -> AuthResult<Option<OAuthRecord>> {
        let all = self.all().await?;
        Ok(all.get(key).cloned())
    }

    /// Replace the record stored under `key`.
    pub async fn set(&self, key: &str, record: OAuthRecord) -> AuthResult<()> {
        self.update(key, move |slot| *slot = record).await
    }

    /// Modify the record stored under `key` in place.
    ///
    /// A record left empty by `f` is removed.
    pub async fn update<F>(&self, key: &str, f: F) -> AuthResult<()>
    where
        F: FnOnce(&mut OAuthRecord),
    {
        let _guard = self.write_lock.lock().await;
        debug!(key = %key, "Updating OAuth record");

        let mut all = self.read_all().await?;
        let mut record = all.remove(key).unwrap_or_default();
        f(&mut record);
        if !record.is_empty() {
            all.insert(key.to_string(), record);
        }
        self.write_all(&all).await?;

        *self.cache.write().await = Some(all);
        Ok(())
    }

    /// Remove the record for `key`.
    ///
    /// Returns `true` if a record was removed.
    pub async fn remove(&self, key: &str) -> AuthResult<bool> {
        let _guard = self.write_lock.lock().await;
        debug!(key = %key, "Removing OAuth record");

        let mut all = self.read_all().await?;
        let existed = all.remove(key).is_some();
        if existed {
            self.write_all(&all).await?;
            *self.cache.write().await = Some(all);
        }
        Ok(existed)
    }

    /// Drop only the tokens for `key`, keeping the registered client.
    pub async fn clear_tokens(&self, key: &str) -> AuthResult<()> {
        self.update(key, |record| {
            record.tokens = None;
            record.token_endpoint = None;
        })
        .await
    }

    /// Get all stored records.
    pub async fn all(&self) -> AuthResult<HashMap<String, OAuthRecord>> {
        {
            let cache = self.cache.read().await;
            if let Some(data) = &*cache {
                return Ok(data.clone());
            }
        }

        let data = self.read_all().await?;
        *self.cache.write().await = Some(data.clone());
        Ok(data)
    }

    pub async fn keys(&self) -> AuthResult<Vec<String>> {
        let mut keys: Vec<String> = self.all().await?.into_keys().collect();
        keys.sort();
        Ok(keys)
    }

    /// Remove every stored record.
    pub async fn clear(&self) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        debug!("Clearing all OAuth records");
        self.write_all(&HashMap::new()).await?;
        *self.cache.write().await = None;
        Ok(())
    }

    async fn read_all(&self) -> AuthResult<HashMap<String, OAuthRecord>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;
        let mut result = HashMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<OAuthRecord>(value) {
                Ok(record) => {
                    result.insert(key, record);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping invalid OAuth record");
                }
            }
        }
        Ok(result)
    }

    async fn write_all(&self, data: &HashMap<String, OAuthRecord>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms)
                .await
                .map_err(|e| {
                    AuthError::Permissions(format!(
                        "Failed to set permissions on {:?}: {}",
                        self.path, e
                    ))
                })?;
        }

        debug!(path = ?self.path, records = data.len(), "Wrote token file");
        Ok(())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("path", &self.path)
            .finish()
    }
}
