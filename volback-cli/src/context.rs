use std::sync::Arc;
use tracing::debug;
use volback_backup::BackupDriver;
use volback_core::{BackupConfig, DiffMode, LocalKeyManager, Result, StateDb, VolumeRecord};
use volback_storage::{
    BlockStore, CopyDiffTransfer, DiffTransfer, LocalBlockStore, RbdDiffPipeline, RbdVolumeIo,
};

const POOLS_DIR: &str = "pools";
const STATE_FILE: &str = "state.json";
const KEYS_FILE: &str = "keys.json";

/// Everything a command needs: the directory store under the data dir, the state and
/// key files next to it, and a driver wired to them.
pub struct Context {
    pub config: BackupConfig,
    pub store: Arc<LocalBlockStore>,
    pub db: Arc<StateDb>,
    pub keys: Arc<LocalKeyManager>,
    pub driver: BackupDriver,
}

impl Context {
    pub async fn open(config: BackupConfig) -> Result<Self> {
        let data_dir = config.data_dir()?;
        debug!("Using data directory {:?}", data_dir);

        let store = Arc::new(LocalBlockStore::new(data_dir.join(POOLS_DIR)));
        store
            .init(&[config.volume_pool.as_str(), config.backup_pool.as_str()])
            .await?;
        let db = Arc::new(StateDb::open(data_dir.join(STATE_FILE)).await?);
        let keys = Arc::new(LocalKeyManager::open(data_dir.join(KEYS_FILE)).await?);

        let diff: Arc<dyn DiffTransfer> = match config.diff_mode {
            DiffMode::Rbd => Arc::new(RbdDiffPipeline::new(config.rbd_binary.clone())),
            DiffMode::Builtin => Arc::new(CopyDiffTransfer::new(
                store.clone(),
                config.chunk_size(),
            )),
        };

        let driver = BackupDriver::new(
            config.clone(),
            store.clone(),
            diff,
            db.clone(),
            keys.clone(),
        )?;

        Ok(Self {
            config,
            store,
            db,
            keys,
            driver,
        })
    }

    /// Writable handle on a volume's image in the volume pool.
    pub async fn open_volume(&self, volume: &VolumeRecord) -> Result<RbdVolumeIo> {
        let image = self
            .store
            .open(&self.config.volume_pool, &volume.name, None, false)
            .await?;
        Ok(RbdVolumeIo::new(
            image,
            &self.config.volume_pool,
            &self.config.volume_user,
            self.config.backup_conf.clone(),
        ))
    }
}
