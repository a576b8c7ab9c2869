use crate::error::{Result, VolbackError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Clones the secret behind `key_id` and returns the id of the new key.
    async fn copy_key(&self, key_id: &str) -> Result<String>;
}

/// Key manager keeping secrets in process, optionally persisted to a JSON file.
pub struct LocalKeyManager {
    keys: Arc<RwLock<HashMap<String, String>>>,
    key_file: Option<PathBuf>,
}

impl LocalKeyManager {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            key_file: None,
        }
    }

    pub async fn open(key_file: PathBuf) -> Result<Self> {
        let manager = Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            key_file: Some(key_file),
        };
        manager.load_keys().await?;
        Ok(manager)
    }

    pub async fn store(&self, secret: impl Into<String>) -> Result<String> {
        let key_id = Uuid::new_v4().to_string();
        self.keys
            .write()
            .await
            .insert(key_id.clone(), secret.into());
        self.save_keys().await?;
        Ok(key_id)
    }

    pub async fn get(&self, key_id: &str) -> Result<String> {
        let keys = self.keys.read().await;
        keys.get(key_id)
            .cloned()
            .ok_or_else(|| VolbackError::KeyNotFound(key_id.to_string()))
    }

    async fn load_keys(&self) -> Result<()> {
        let Some(key_file) = &self.key_file else {
            return Ok(());
        };

        if key_file.exists() {
            let content = fs::read_to_string(key_file).await?;
            let keys: HashMap<String, String> = serde_json::from_str(&content)?;
            *self.keys.write().await = keys;
            debug!("Loaded {} keys", self.keys.read().await.len());
        }

        Ok(())
    }

    async fn save_keys(&self) -> Result<()> {
        let Some(key_file) = &self.key_file else {
            return Ok(());
        };

        if let Some(parent) = key_file.parent() {
            fs::create_dir_all(parent).await?;
        }

        let keys = self.keys.read().await;
        let content = serde_json::to_string_pretty(&*keys)?;
        fs::write(key_file, content).await?;
        Ok(())
    }
}

impl Default for LocalKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManager for LocalKeyManager {
    async fn copy_key(&self, key_id: &str) -> Result<String> {
        let secret = self.get(key_id).await?;
        let new_id = self.store(secret).await?;
        debug!("Copied key {} to {}", key_id, new_id);
        Ok(new_id)
    }
}
