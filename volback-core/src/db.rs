use crate::error::{Result, VolbackError};
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Relational store holding volume and backup records.
#[async_trait]
pub trait VolumeDb: Send + Sync {
    async fn volume_get(&self, volume_id: &str) -> Result<VolumeRecord>;
    async fn volume_update(&self, volume_id: &str, update: VolumeUpdate) -> Result<()>;
    async fn volume_metadata_get(&self, volume_id: &str) -> Result<BTreeMap<String, String>>;
    /// Merges `metadata` into the volume's metadata, or replaces it when `delete` is set.
    async fn volume_metadata_update(
        &self,
        volume_id: &str,
        metadata: BTreeMap<String, String>,
        delete: bool,
    ) -> Result<()>;
    /// Fails with `GlanceMetadataNotFound` when the volume has none.
    async fn volume_glance_metadata_get(&self, volume_id: &str)
    -> Result<BTreeMap<String, String>>;
    async fn volume_glance_metadata_create(
        &self,
        volume_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;
    async fn volume_glance_metadata_delete_by_volume(&self, volume_id: &str) -> Result<()>;
    async fn volume_type_get(&self, type_id: &str) -> Result<VolumeType>;
    async fn backup_get(&self, backup_id: &str) -> Result<BackupRecord>;
    async fn backup_update(&self, backup_id: &str, update: BackupUpdate) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    volumes: HashMap<String, VolumeRecord>,
    volume_metadata: HashMap<String, BTreeMap<String, String>>,
    glance_metadata: HashMap<String, BTreeMap<String, String>>,
    volume_types: HashMap<String, VolumeType>,
    backups: HashMap<String, BackupRecord>,
}

/// In-process record store, optionally persisted to a JSON state file.
pub struct StateDb {
    state: Arc<RwLock<State>>,
    state_file: Option<PathBuf>,
}

impl StateDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            state_file: None,
        }
    }

    pub async fn open(state_file: PathBuf) -> Result<Self> {
        let db = Self {
            state: Arc::new(RwLock::new(State::default())),
            state_file: Some(state_file),
        };
        db.load_state().await?;
        Ok(db)
    }

    async fn load_state(&self) -> Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        if state_file.exists() {
            let content = fs::read_to_string(state_file).await?;
            let state: State = serde_json::from_str(&content)?;
            *self.state.write().await = state;
            debug!(
                "Loaded {} volumes and {} backups from state",
                self.state.read().await.volumes.len(),
                self.state.read().await.backups.len()
            );
        }

        Ok(())
    }

    async fn save_state(&self) -> Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        if let Some(parent) = state_file.parent() {
            fs::create_dir_all(parent).await?;
        }

        let state = self.state.read().await;
        let content = serde_json::to_string_pretty(&*state)?;
        fs::write(state_file, content).await?;
        Ok(())
    }

    pub async fn volume_create(&self, volume: VolumeRecord) -> Result<()> {
        self.state
            .write()
            .await
            .volumes
            .insert(volume.id.clone(), volume);
        self.save_state().await
    }

    pub async fn volume_destroy(&self, volume_id: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state
                .volumes
                .remove(volume_id)
                .ok_or_else(|| VolbackError::VolumeNotFound(volume_id.to_string()))?;
            state.volume_metadata.remove(volume_id);
            state.glance_metadata.remove(volume_id);
        }
        self.save_state().await
    }

    pub async fn volume_list(&self) -> Result<Vec<VolumeRecord>> {
        let state = self.state.read().await;
        let mut volumes: Vec<_> = state.volumes.values().cloned().collect();
        volumes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(volumes)
    }

    pub async fn volume_type_create(&self, volume_type: VolumeType) -> Result<()> {
        self.state
            .write()
            .await
            .volume_types
            .insert(volume_type.id.clone(), volume_type);
        self.save_state().await
    }

    pub async fn volume_type_destroy(&self, type_id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .volume_types
            .remove(type_id)
            .ok_or_else(|| VolbackError::VolumeTypeNotFound(type_id.to_string()))?;
        self.save_state().await
    }

    pub async fn backup_create(&self, backup: BackupRecord) -> Result<()> {
        self.state
            .write()
            .await
            .backups
            .insert(backup.id.clone(), backup);
        self.save_state().await
    }

    pub async fn backup_destroy(&self, backup_id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .backups
            .remove(backup_id)
            .ok_or_else(|| VolbackError::BackupNotFound(backup_id.to_string()))?;
        self.save_state().await
    }

    pub async fn backup_list(&self) -> Result<Vec<BackupRecord>> {
        let state = self.state.read().await;
        let mut backups: Vec<_> = state.backups.values().cloned().collect();
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(backups)
    }
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeDb for StateDb {
    async fn volume_get(&self, volume_id: &str) -> Result<VolumeRecord> {
        let state = self.state.read().await;
        state
            .volumes
            .get(volume_id)
            .cloned()
            .ok_or_else(|| VolbackError::VolumeNotFound(volume_id.to_string()))
    }

    async fn volume_update(&self, volume_id: &str, update: VolumeUpdate) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let volume = state
                .volumes
                .get_mut(volume_id)
                .ok_or_else(|| VolbackError::VolumeNotFound(volume_id.to_string()))?;
            update.apply(volume);
        }
        self.save_state().await
    }

    async fn volume_metadata_get(&self, volume_id: &str) -> Result<BTreeMap<String, String>> {
        let state = self.state.read().await;
        if !state.volumes.contains_key(volume_id) {
            return Err(VolbackError::VolumeNotFound(volume_id.to_string()));
        }
        Ok(state
            .volume_metadata
            .get(volume_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn volume_metadata_update(
        &self,
        volume_id: &str,
        metadata: BTreeMap<String, String>,
        delete: bool,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.volumes.contains_key(volume_id) {
                return Err(VolbackError::VolumeNotFound(volume_id.to_string()));
            }
            let entry = state
                .volume_metadata
                .entry(volume_id.to_string())
                .or_default();
            if delete {
                *entry = metadata;
            } else {
                entry.extend(metadata);
            }
        }
        self.save_state().await
    }

    async fn volume_glance_metadata_get(
        &self,
        volume_id: &str,
    ) -> Result<BTreeMap<String, String>> {
        let state = self.state.read().await;
        match state.glance_metadata.get(volume_id) {
            Some(metadata) if !metadata.is_empty() => Ok(metadata.clone()),
            _ => Err(VolbackError::GlanceMetadataNotFound(volume_id.to_string())),
        }
    }

    async fn volume_glance_metadata_create(
        &self,
        volume_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.volumes.contains_key(volume_id) {
                return Err(VolbackError::VolumeNotFound(volume_id.to_string()));
            }
            state
                .glance_metadata
                .entry(volume_id.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
        self.save_state().await
    }

    async fn volume_glance_metadata_delete_by_volume(&self, volume_id: &str) -> Result<()> {
        self.state.write().await.glance_metadata.remove(volume_id);
        self.save_state().await
    }

    async fn volume_type_get(&self, type_id: &str) -> Result<VolumeType> {
        let state = self.state.read().await;
        state
            .volume_types
            .get(type_id)
            .cloned()
            .ok_or_else(|| VolbackError::VolumeTypeNotFound(type_id.to_string()))
    }

    async fn backup_get(&self, backup_id: &str) -> Result<BackupRecord> {
        let state = self.state.read().await;
        state
            .backups
            .get(backup_id)
            .cloned()
            .ok_or_else(|| VolbackError::BackupNotFound(backup_id.to_string()))
    }

    async fn backup_update(&self, backup_id: &str, update: BackupUpdate) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let backup = state
                .backups
                .get_mut(backup_id)
                .ok_or_else(|| VolbackError::BackupNotFound(backup_id.to_string()))?;
            if let Some(status) = update.status {
                backup.status = status;
            }
            if let Some(container) = update.container {
                backup.container = Some(container);
            }
            if let Some(service_metadata) = update.service_metadata {
                backup.service_metadata = Some(service_metadata);
            }
        }
        self.save_state().await
    }
}
