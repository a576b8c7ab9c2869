use std::sync::Arc;
use tracing::debug;
use volback_core::{Result, VolbackError};
use volback_storage::BlockStore;

/// Write-once side-channel object holding the metadata backup of one backup id.
pub struct VolumeMetadataBackup {
    store: Arc<dyn BlockStore>,
    pool: String,
    backup_id: String,
}

impl VolumeMetadataBackup {
    pub fn new(store: Arc<dyn BlockStore>, pool: &str, backup_id: &str) -> Self {
        Self {
            store,
            pool: pool.to_string(),
            backup_id: backup_id.to_string(),
        }
    }

    pub fn name(&self) -> String {
        format!("backup.{}.meta", self.backup_id)
    }

    pub async fn exists(&self) -> Result<bool> {
        self.store.object_exists(&self.pool, &self.name()).await
    }

    /// Stores `json_meta`; an existing object is never overwritten.
    pub async fn set(&self, json_meta: &str) -> Result<()> {
        let name = self.name();
        if self.exists().await? {
            return Err(VolbackError::MetadataBackupExists(name));
        }
        self.store
            .write_object(&self.pool, &name, json_meta.as_bytes())
            .await
    }

    pub async fn get(&self) -> Result<Option<String>> {
        let name = self.name();
        if !self.exists().await? {
            debug!("Metadata backup object {} does not exist", name);
            return Ok(None);
        }

        let data = self.store.read_object(&self.pool, &name).await?;
        let json = String::from_utf8(data.to_vec()).map_err(|e| {
            VolbackError::StorageError(format!("Metadata backup object {name} is not UTF-8: {e}"))
        })?;
        Ok(Some(json))
    }

    pub async fn remove_if_exists(&self) -> Result<()> {
        let name = self.name();
        match self.store.remove_object(&self.pool, &name).await {
            Ok(()) => Ok(()),
            Err(VolbackError::ObjectNotFound(_)) => {
                debug!("Metadata backup object '{}' not found - ignoring", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
