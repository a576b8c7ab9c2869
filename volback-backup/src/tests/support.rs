use crate::BackupDriver;
use std::sync::Arc;
use volback_core::{
    BackupConfig, BackupRecord, DiffMode, LocalKeyManager, MIB, Result, StateDb, VolumeRecord,
};
use volback_storage::{BlockStore, CopyDiffTransfer, CreateOptions, MemoryBlockStore, RbdVolumeIo};

pub const VOLUME_POOL: &str = "volumes";
pub const BACKUP_POOL: &str = "backups";

pub fn test_config() -> BackupConfig {
    BackupConfig {
        chunk_size_bytes: 64 * MIB,
        busy_retry_delay_seconds: 0,
        backup_conf: None,
        diff_mode: DiffMode::Builtin,
        ..Default::default()
    }
}

pub struct Harness {
    pub store: MemoryBlockStore,
    pub diff: Arc<CopyDiffTransfer>,
    pub db: Arc<StateDb>,
    pub keys: Arc<LocalKeyManager>,
    pub driver: BackupDriver,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: BackupConfig) -> Result<Self> {
        let store = MemoryBlockStore::with_pools(&[VOLUME_POOL, BACKUP_POOL]).await;
        let diff = Arc::new(CopyDiffTransfer::new(Arc::new(store.clone()), 4 * MIB as usize));
        let db = Arc::new(StateDb::new());
        let keys = Arc::new(LocalKeyManager::new());
        let driver = BackupDriver::new(
            config,
            Arc::new(store.clone()),
            diff.clone(),
            db.clone(),
            keys.clone(),
        )?;

        Ok(Self {
            store,
            diff,
            db,
            keys,
            driver,
        })
    }

    pub async fn create_volume(&self, id: &str, size_gb: u64) -> Result<VolumeRecord> {
        let volume = VolumeRecord::new(id, size_gb);
        self.db.volume_create(volume.clone()).await?;
        self.store
            .create(
                VOLUME_POOL,
                &volume.name,
                volume.size_bytes(),
                &CreateOptions::default(),
            )
            .await?;
        Ok(volume)
    }

    pub async fn open_volume(&self, volume: &VolumeRecord) -> Result<RbdVolumeIo> {
        let image = self
            .store
            .open(VOLUME_POOL, &volume.name, None, false)
            .await?;
        Ok(RbdVolumeIo::new(image, VOLUME_POOL, "cinder", None))
    }

    pub async fn write_volume(&self, volume: &VolumeRecord, data: &[u8], offset: u64) -> Result<()> {
        let image = self
            .store
            .open(VOLUME_POOL, &volume.name, None, false)
            .await?;
        image.write(data, offset).await
    }

    pub async fn new_backup(&self, id: &str, volume: &VolumeRecord) -> Result<BackupRecord> {
        let backup = BackupRecord::new(id, &volume.id, volume.size_gb);
        self.db.backup_create(backup.clone()).await?;
        Ok(backup)
    }

    pub async fn snaps(&self, pool: &str, name: &str) -> Result<Vec<String>> {
        let image = self.store.open(pool, name, None, true).await?;
        Ok(image
            .list_snaps()
            .await?
            .into_iter()
            .map(|snap| snap.name)
            .collect())
    }
}
