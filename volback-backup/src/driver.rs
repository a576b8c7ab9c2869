use crate::metadata::BackupMetadataApi;
use crate::naming;
use crate::object::VolumeMetadataBackup;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use volback_core::{
    BackupConfig, BackupRecord, BackupUpdate, DiffMode, KeyManager, Result, VolbackError,
    VolumeDb, VolumeRecord,
};
use volback_storage::{
    BlockStore, ChunkedTransfer, CreateOptions, DiffTransfer, ImageFeature, ImageSpec,
    RbdVolumeIo, VolumeIo,
};

type VolumeLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

fn volume_length(volume: &VolumeRecord) -> Result<u64> {
    if volume.size_gb == 0 {
        return Err(VolbackError::InvalidParameter(format!(
            "Need non-zero volume size (volume {})",
            volume.id
        )));
    }
    Ok(volume.size_bytes())
}

/// Backs volumes up into a block store, incrementally through snapshot diffs where the
/// volume lives in the store and by full copy otherwise.
pub struct BackupDriver {
    config: BackupConfig,
    store: Arc<dyn BlockStore>,
    diff: Arc<dyn DiffTransfer>,
    db: Arc<dyn VolumeDb>,
    metadata_api: BackupMetadataApi,
    transfer: ChunkedTransfer,
    volume_locks: VolumeLocks,
}

impl BackupDriver {
    pub fn new(
        config: BackupConfig,
        store: Arc<dyn BlockStore>,
        diff: Arc<dyn DiffTransfer>,
        db: Arc<dyn VolumeDb>,
        key_manager: Arc<dyn KeyManager>,
    ) -> Result<Self> {
        config.validate()?;
        let metadata_api = BackupMetadataApi::new(db.clone(), key_manager, config.metadata_version);
        let transfer = ChunkedTransfer::from_config(&config);

        Ok(Self {
            config,
            store,
            diff,
            db,
            metadata_api,
            transfer,
            volume_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub async fn check_for_setup_error(&self) -> Result<()> {
        self.config.validate()?;
        self.store
            .list(&self.config.backup_pool)
            .await
            .map_err(|e| {
                VolbackError::ConfigError(format!(
                    "Backup pool '{}' is not accessible: {}",
                    self.config.backup_pool, e
                ))
            })?;

        if self.config.diff_mode == DiffMode::Rbd {
            let path = which::which(&self.config.rbd_binary).map_err(|e| {
                VolbackError::ConfigError(format!(
                    "Diff tool {:?} not found: {}",
                    self.config.rbd_binary, e
                ))
            })?;
            debug!("Using diff tool {:?}", path);
        }
        Ok(())
    }

    pub async fn get_metadata(&self, volume_id: &str) -> Result<Option<String>> {
        self.metadata_api.get(volume_id).await
    }

    pub async fn put_metadata(&self, volume_id: &str, json_metadata: &str) -> Result<()> {
        self.metadata_api.put(volume_id, json_metadata).await
    }

    fn backup_pool(&self, backup: &BackupRecord) -> String {
        backup
            .container
            .clone()
            .unwrap_or_else(|| self.config.backup_pool.clone())
    }

    fn create_options(&self) -> CreateOptions {
        let mut features = vec![ImageFeature::Layering];
        if self.config.stripe_unit > 0 || self.config.stripe_count > 0 {
            features.push(ImageFeature::StripingV2);
        }
        if self.config.image_journals {
            features.push(ImageFeature::ExclusiveLock);
            features.push(ImageFeature::Journaling);
        }
        CreateOptions {
            features,
            stripe_unit: self.config.stripe_unit,
            stripe_count: self.config.stripe_count,
        }
    }

    fn volume_lock(&self, volume_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .volume_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(volume_id.to_string()).or_default().clone()
    }

    /// Forgets the volume's lock once no other backup holds or waits on it. Clones are
    /// only taken under the map lock, so the count cannot grow behind this check.
    fn release_volume_lock(&self, volume_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .volume_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let unused = locks
            .get(volume_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            locks.remove(volume_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_volume_locks(&self) -> usize {
        self.volume_locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }

    /// Backs up the volume behind `volume`, recording the container and base image on
    /// the backup record. A failed metadata backup removes the data again.
    pub async fn backup(
        &self,
        backup: &mut BackupRecord,
        volume: &mut dyn VolumeIo,
        backup_metadata: bool,
    ) -> Result<()> {
        naming::validate_backup_id(&backup.id)?;
        let record = self.db.volume_get(&backup.volume_id).await?;
        let length = volume_length(&record)?;
        let pool = self.backup_pool(backup);
        backup.container = Some(pool.clone());

        info!("Starting backup {} of volume {}", backup.id, record.id);
        volume.seek(0).await?;

        let mut base = None;
        if let Some(rbd) = volume.as_rbd() {
            debug!("Volume handle is RBD: attempting incremental backup");
            match self.backup_rbd(backup, rbd, &pool, length).await {
                Ok(name) => base = Some(name),
                Err(e) if e.is_recoverable() => {
                    info!(
                        "Incremental backup of volume {} failed, forcing full backup: {}",
                        record.id, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let base = match base {
            Some(base) => base,
            None => {
                self.full_backup(backup, volume, &record.name, &pool, length)
                    .await?
            }
        };

        backup.service_metadata = Some(BackupRecord::service_metadata_for(&base));
        self.db
            .backup_update(
                &backup.id,
                BackupUpdate {
                    container: Some(pool.clone()),
                    service_metadata: backup.service_metadata.clone(),
                    ..Default::default()
                },
            )
            .await?;

        if backup_metadata {
            if let Err(e) = self.backup_metadata(backup, &pool).await {
                if e.is_operation_failure() {
                    error!(
                        "Metadata backup for backup {} failed, removing backup data: {}",
                        backup.id, e
                    );
                    if let Err(cleanup) = self.delete(backup).await {
                        warn!("Cleanup of backup {} failed: {}", backup.id, cleanup);
                    }
                }
                return Err(e);
            }
        }

        info!(
            "Backup {} of volume {} finished (base {})",
            backup.id, record.id, base
        );
        Ok(())
    }

    async fn backup_metadata(&self, backup: &BackupRecord, pool: &str) -> Result<()> {
        let Some(json_meta) = self.metadata_api.get(&backup.volume_id).await? else {
            debug!("No metadata to back up for backup {}", backup.id);
            return Ok(());
        };

        VolumeMetadataBackup::new(self.store.clone(), pool, &backup.id)
            .set(&json_meta)
            .await
            .map_err(|e| match e {
                VolbackError::MetadataBackupExists(_) => VolbackError::fatal(
                    "metadata backup",
                    format!("Failed to backup volume metadata - {e}"),
                ),
                other => other,
            })
    }

    /// Diff from the newest backup snapshot of the source into the shared base image.
    /// Incrementals of one volume run one at a time.
    async fn backup_rbd(
        &self,
        backup: &BackupRecord,
        source: &RbdVolumeIo,
        pool: &str,
        length: u64,
    ) -> Result<String> {
        let lock = self.volume_lock(&backup.volume_id);
        let result = {
            let _guard = lock.lock().await;
            self.backup_rbd_locked(backup, source, pool, length).await
        };
        self.release_volume_lock(&backup.volume_id, lock);
        result
    }

    async fn backup_rbd_locked(
        &self,
        backup: &BackupRecord,
        source: &RbdVolumeIo,
        pool: &str,
        length: u64,
    ) -> Result<String> {
        let image = source.image();
        let mut from_snap = naming::most_recent_snapshot(image).await?;
        debug!(
            "Using --from-snap '{:?}' for incremental backup of volume {}",
            from_snap, backup.volume_id
        );

        let base_name = naming::diff_base_name(&backup.volume_id);
        let mut image_created = false;

        if !self.store.exists(pool, &base_name).await? {
            if let Some(stale) = from_snap.take() {
                debug!(
                    "Source snapshot '{}' of volume {} is stale so deleting",
                    stale, backup.volume_id
                );
                image.remove_snap(&stale).await?;
            }

            match self
                .store
                .create(pool, &base_name, length, &self.create_options())
                .await
            {
                Ok(()) => image_created = true,
                Err(VolbackError::ImageExists(_)) => {
                    return Err(VolbackError::recoverable(
                        "incremental backup",
                        format!("base image '{base_name}' was created concurrently"),
                    ));
                }
                Err(e) => return Err(e),
            }
        } else if !self
            .snap_exists(pool, &base_name, from_snap.as_deref())
            .await?
        {
            let msg = format!(
                "Snapshot='{}' does not exist in base image='{}' - aborting incremental backup",
                from_snap.as_deref().unwrap_or("None"),
                base_name
            );
            info!("{}", msg);
            return Err(VolbackError::recoverable("incremental backup", msg));
        }

        let new_snap = naming::new_snapshot_name(&backup.id);
        debug!("Creating backup snapshot='{}'", new_snap);
        image.create_snap(&new_snap).await?;

        let src = source.spec().with_snapshot(Some(&new_snap));
        let dest = ImageSpec::new(pool, &base_name, &self.config.backup_user)
            .with_conf(self.config.backup_conf.clone());
        let started = Instant::now();

        match self.diff.transfer(&src, &dest, from_snap.as_deref()).await {
            Ok(()) => {
                debug!(
                    "Differential backup transfer completed in {:.4}s",
                    started.elapsed().as_secs_f64()
                );
                if let Some(from_snap) = from_snap {
                    image.remove_snap(&from_snap).await?;
                }
                Ok(base_name)
            }
            Err(e) => {
                debug!("Differential backup transfer failed: {}", e);
                if image_created {
                    if let Err(cleanup) = self
                        .try_delete_base_image(backup, pool, Some(&base_name))
                        .await
                    {
                        warn!(
                            "Failed to remove base image '{}' after failed backup: {}",
                            base_name, cleanup
                        );
                    }
                }
                debug!(
                    "Deleting diff backup snapshot='{}' of source volume {}",
                    new_snap, backup.volume_id
                );
                image.remove_snap(&new_snap).await?;
                Err(e)
            }
        }
    }

    async fn snap_exists(&self, pool: &str, base_name: &str, snap: Option<&str>) -> Result<bool> {
        let Some(snap) = snap else {
            return Ok(false);
        };
        let base = self.store.open(pool, base_name, None, true).await?;
        Ok(base.list_snaps().await?.iter().any(|s| s.name == snap))
    }

    /// Copies the whole volume into a base image of its own.
    async fn full_backup(
        &self,
        backup: &BackupRecord,
        volume: &mut dyn VolumeIo,
        volume_name: &str,
        pool: &str,
        length: u64,
    ) -> Result<String> {
        let backup_name = naming::base_name(&backup.volume_id, Some(&backup.id), false)?;
        debug!(
            "Creating backup base image='{}' for volume {}",
            backup_name, backup.volume_id
        );
        self.store
            .create(pool, &backup_name, length, &self.create_options())
            .await?;

        let image = self.store.open(pool, &backup_name, None, false).await?;
        let mut dest = RbdVolumeIo::new(
            image,
            pool,
            &self.config.backup_user,
            self.config.backup_conf.clone(),
        );

        debug!("Copying data from volume {}", backup.volume_id);
        volume.seek(0).await?;
        let result = self
            .transfer
            .transfer(volume, volume_name, &mut dest, &backup_name, length)
            .await;
        drop(dest);

        if let Err(e) = result {
            if let Err(cleanup) = self.store.remove(pool, &backup_name).await {
                warn!(
                    "Failed to remove partial backup image '{}': {}",
                    backup_name, cleanup
                );
            }
            return Err(e);
        }
        Ok(backup_name)
    }

    /// Restores `backup` into volume `volume_id` through `volume`, then its metadata.
    pub async fn restore(
        &self,
        backup: &BackupRecord,
        volume_id: &str,
        volume: &mut dyn VolumeIo,
    ) -> Result<()> {
        let target = self.db.volume_get(volume_id).await?;
        info!(
            "Starting restore from backup {} to volume {}",
            backup.id, volume_id
        );

        match self.restore_all(backup, &target, volume).await {
            Ok(()) => {
                debug!("Restore to volume {} finished successfully", volume_id);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Restore to volume {} finished with error - {}",
                    volume_id, e
                );
                Err(e)
            }
        }
    }

    async fn restore_all(
        &self,
        backup: &BackupRecord,
        target: &VolumeRecord,
        volume: &mut dyn VolumeIo,
    ) -> Result<()> {
        self.restore_volume(backup, target, volume).await?;
        if !volume.fsync().await? {
            debug!("Restore target I/O object does not support fsync - skipping");
        }
        self.restore_metadata(backup, &target.id).await
    }

    async fn restore_volume(
        &self,
        backup: &BackupRecord,
        target: &VolumeRecord,
        volume: &mut dyn VolumeIo,
    ) -> Result<()> {
        let length = volume_length(target)?;
        let pool = self.backup_pool(backup);
        let base_name = naming::diff_base_name(&backup.volume_id);
        let (diff_allowed, restore_point) = self
            .diff_restore_allowed(&base_name, backup, target, &*volume, &pool)
            .await?;

        if diff_allowed {
            if let (Some(restore_point), Some(rbd)) = (restore_point.as_deref(), volume.as_rbd()) {
                debug!("Attempting differential restore");
                match self
                    .diff_restore(rbd, &base_name, restore_point, &pool, length)
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_recoverable() => {
                        warn!("Differential restore failed, trying full restore: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        debug!("Running full restore to volume {}", target.id);
        self.full_restore(
            backup,
            volume,
            &target.name,
            length,
            restore_point.as_deref(),
            &pool,
        )
        .await
    }

    /// Whether a diff restore may run, and the restore point a full restore should
    /// read from.
    async fn diff_restore_allowed(
        &self,
        base_name: &str,
        backup: &BackupRecord,
        target: &VolumeRecord,
        volume: &dyn VolumeIo,
        pool: &str,
    ) -> Result<(bool, Option<String>)> {
        if !self.store.exists(pool, base_name).await? {
            debug!("Diff base image '{}' not found", base_name);
            return Ok((false, None));
        }

        let Some(restore_point) = self.restore_point(pool, base_name, &backup.id).await? else {
            if backup.recorded_base().as_deref() == Some(base_name) {
                warn!(
                    "Backup {} was taken into diff base '{}' but has no restore point - forcing full copy",
                    backup.id, base_name
                );
            } else {
                info!(
                    "No restore point found for backup='{}' of volume {} although base image is found - forcing full copy",
                    backup.id, backup.volume_id
                );
            }
            return Ok((false, None));
        };

        let Some(rbd) = volume.as_rbd() else {
            debug!("Restore target is not RBD - forcing full copy");
            return Ok((false, Some(restore_point)));
        };
        if target.id == backup.volume_id {
            debug!(
                "Destination volume is same as backup source volume {} - forcing full copy",
                target.id
            );
            return Ok((false, Some(restore_point)));
        }
        if rbd.image().has_extents().await? {
            debug!("Destination has extents - forcing full copy");
            return Ok((false, Some(restore_point)));
        }
        Ok((true, Some(restore_point)))
    }

    async fn restore_point(
        &self,
        pool: &str,
        base_name: &str,
        backup_id: &str,
    ) -> Result<Option<String>> {
        let base = self.store.open(pool, base_name, None, true).await?;
        naming::snapshot_for_backup(base.as_ref(), base_name, backup_id).await
    }

    async fn diff_restore(
        &self,
        dest: &RbdVolumeIo,
        base_name: &str,
        restore_point: &str,
        pool: &str,
        length: u64,
    ) -> Result<()> {
        debug!(
            "Attempting incremental restore from base='{}' snap='{}'",
            base_name, restore_point
        );
        let started = Instant::now();
        let src = ImageSpec::new(pool, base_name, &self.config.backup_user)
            .with_conf(self.config.backup_conf.clone())
            .with_snapshot(Some(restore_point));

        self.diff.transfer(&src, &dest.spec(), None).await?;
        self.check_restore_vol_size(dest, length).await?;

        debug!(
            "Restore transfer completed in {:.4}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// A diff import leaves the destination at the size of the backed up volume;
    /// grow it back to the restore length.
    async fn check_restore_vol_size(&self, dest: &RbdVolumeIo, length: u64) -> Result<()> {
        let size = dest.image().size().await?;
        if size != length {
            debug!(
                "Adjusting restore volume {} size from {} to {}",
                dest.name(),
                size,
                length
            );
            dest.image().resize(length).await?;
        }
        Ok(())
    }

    async fn full_restore(
        &self,
        backup: &BackupRecord,
        volume: &mut dyn VolumeIo,
        dest_name: &str,
        length: u64,
        restore_point: Option<&str>,
        pool: &str,
    ) -> Result<()> {
        let diff_base = naming::diff_base_name(&backup.volume_id);
        let backup_name = match restore_point {
            Some(_) => diff_base,
            None => match backup.recorded_base() {
                Some(base) if base != diff_base => base,
                _ => naming::base_name(&backup.volume_id, Some(&backup.id), false)?,
            },
        };

        let image = self
            .store
            .open(pool, &backup_name, restore_point, true)
            .await?;
        let mut src = RbdVolumeIo::new(
            image,
            pool,
            &self.config.backup_user,
            self.config.backup_conf.clone(),
        );

        volume.seek(0).await?;
        self.transfer
            .transfer(&mut src, &backup_name, volume, dest_name, length)
            .await
    }

    async fn restore_metadata(&self, backup: &BackupRecord, volume_id: &str) -> Result<()> {
        let pool = self.backup_pool(backup);
        let Some(json_meta) = VolumeMetadataBackup::new(self.store.clone(), &pool, &backup.id)
            .get()
            .await?
        else {
            debug!("Volume has no backed up metadata");
            return Ok(());
        };

        self.metadata_api
            .put(volume_id, &json_meta)
            .await
            .map_err(|e| match e {
                VolbackError::UnsupportedMetadataVersion(version) => {
                    let msg = "Metadata restore failed due to incompatible version";
                    error!("{} ({})", msg, version);
                    VolbackError::fatal("metadata restore", msg)
                }
                other => other,
            })
    }

    /// Removes the backup's data and metadata object. Missing images or pools are
    /// treated as already deleted.
    pub async fn delete(&self, backup: &BackupRecord) -> Result<()> {
        let pool = self.backup_pool(backup);
        debug!("Delete started for backup={}", backup.id);

        let mut delete_failed = false;
        let mut has_pool = true;
        match self.try_delete_base_image(backup, &pool, None).await {
            Ok(()) => {}
            Err(VolbackError::ImageNotFound(_)) => {
                warn!(
                    "RBD image for backup {} of volume {} not found. Deleting backup metadata.",
                    backup.id, backup.volume_id
                );
                delete_failed = true;
            }
            Err(VolbackError::PoolNotFound(_)) => {
                warn!("The pool {} doesn't exist.", pool);
                delete_failed = true;
                has_pool = false;
            }
            Err(e) => return Err(e),
        }

        if has_pool {
            VolumeMetadataBackup::new(self.store.clone(), &pool, &backup.id)
                .remove_if_exists()
                .await?;
        }

        if delete_failed {
            info!(
                "Delete of backup '{}' for volume '{}' finished with warning.",
                backup.id, backup.volume_id
            );
        } else {
            debug!(
                "Delete of backup '{}' for volume '{}' finished.",
                backup.id, backup.volume_id
            );
        }
        Ok(())
    }

    /// Resolves the base image name of a backup: the one recorded in service
    /// metadata, else the full-format name, falling back to the diff-format name.
    async fn resolve_base_image(
        &self,
        backup: &BackupRecord,
        pool: &str,
        base_name: Option<&str>,
    ) -> Result<String> {
        let images = self.store.list(pool).await?;
        let (name, try_diff_format) = match base_name {
            Some(name) => (name.to_string(), false),
            None => {
                let name = match backup.recorded_base() {
                    Some(name) => name,
                    None => naming::base_name(&backup.volume_id, Some(&backup.id), false)?,
                };
                (name, true)
            }
        };

        if images.contains(&name) {
            return Ok(name);
        }
        debug!("Image '{}' not found - trying diff format name", name);
        if try_diff_format {
            let diff_name = naming::diff_base_name(&backup.volume_id);
            if images.contains(&diff_name) {
                return Ok(diff_name);
            }
            debug!("Diff format image '{}' not found", diff_name);
            return Err(VolbackError::ImageNotFound(diff_name));
        }
        Err(VolbackError::ImageNotFound(name))
    }

    /// Drops the backup's snapshot from its base image and removes the base once no
    /// backup snapshots remain, retrying while the image is busy.
    async fn try_delete_base_image(
        &self,
        backup: &BackupRecord,
        pool: &str,
        base_name: Option<&str>,
    ) -> Result<()> {
        let volume_id = &backup.volume_id;
        let base_name = self.resolve_base_image(backup, pool, base_name).await?;

        let mut retries = self.config.busy_retry_count;
        let mut deleted_snap: Option<String> = None;
        loop {
            let (snap, remaining) = self
                .delete_backup_snapshot(pool, &base_name, &backup.id)
                .await?;
            if deleted_snap.is_none() {
                deleted_snap = snap;
            }
            if remaining > 0 {
                info!(
                    "Backup base image of volume {} still has {} snapshots so skipping base image delete.",
                    volume_id, remaining
                );
                return Ok(());
            }

            info!(
                "Deleting backup base image='{}' of volume {}.",
                base_name, volume_id
            );
            match self.store.remove(pool, &base_name).await {
                Ok(()) => {
                    debug!(
                        "Base backup image='{}' of volume {} deleted.",
                        base_name, volume_id
                    );
                    break;
                }
                Err(VolbackError::ImageBusy(_)) if retries > 0 => {
                    info!(
                        "Backup image of volume {} is busy, retrying {} more time(s) in {}s.",
                        volume_id, retries, self.config.busy_retry_delay_seconds
                    );
                    retries -= 1;
                    tokio::time::sleep(self.config.busy_retry_delay()).await;
                }
                Err(e @ VolbackError::ImageBusy(_)) => {
                    error!(
                        "Max retries reached deleting backup {} image of volume {}.",
                        base_name, volume_id
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(snap) = deleted_snap {
            self.remove_source_snapshot(volume_id, &snap, &base_name)
                .await;
        }
        Ok(())
    }

    async fn delete_backup_snapshot(
        &self,
        pool: &str,
        base_name: &str,
        backup_id: &str,
    ) -> Result<(Option<String>, usize)> {
        let base = self.store.open(pool, base_name, None, false).await?;
        let snap = naming::snapshot_for_backup(base.as_ref(), base_name, backup_id).await?;
        match &snap {
            Some(snap) => {
                debug!("Deleting backup snapshot='{}'", snap);
                base.remove_snap(snap).await?;
            }
            None => debug!("No backup snapshot to delete"),
        }

        let remaining = naming::list_backup_snapshots(base.as_ref(), false)
            .await?
            .len();
        Ok((snap, remaining))
    }

    /// Best-effort removal of the backup snapshot left on the source volume once its
    /// base image is gone.
    async fn remove_source_snapshot(&self, volume_id: &str, snap: &str, base_name: &str) {
        let volume_name = match self.db.volume_get(volume_id).await {
            Ok(volume) => volume.name,
            Err(e) => {
                debug!("Source volume {} not found: {}", volume_id, e);
                return;
            }
        };
        let pool = &self.config.volume_pool;
        if !matches!(self.store.exists(pool, &volume_name).await, Ok(true)) {
            return;
        }

        debug!(
            "Deleting source volume snapshot '{}' for backup {}.",
            snap, base_name
        );
        let result = match self.store.open(pool, &volume_name, None, false).await {
            Ok(image) => image.remove_snap(snap).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(
                "Source volume snapshot '{}' of {} not removed: {}",
                snap, volume_name, e
            );
        }
    }
}
