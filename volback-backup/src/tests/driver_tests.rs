use super::support::{BACKUP_POOL, Harness, VOLUME_POOL, test_config};
use crate::BackupDriver;
use std::sync::Arc;
use volback_core::{
    BackupConfig, DiffMode, LocalKeyManager, Result, StateDb, VolbackError, VolumeDb,
    VolumeRecord,
};
use volback_storage::{
    BlockStore, CopyDiffTransfer, FileVolumeIo, ImageFeature, MemoryBlockStore, VolumeIo,
};

#[tokio::test]
async fn test_rejects_invalid_config() {
    let store = Arc::new(MemoryBlockStore::new());
    let config = BackupConfig {
        chunk_size_bytes: 0,
        ..test_config()
    };

    let result = BackupDriver::new(
        config,
        store.clone(),
        Arc::new(CopyDiffTransfer::new(store, 1024)),
        Arc::new(StateDb::new()),
        Arc::new(LocalKeyManager::new()),
    );
    assert!(matches!(result, Err(VolbackError::ConfigError(_))));
}

#[tokio::test]
async fn test_check_for_setup_error() -> Result<()> {
    let harness = Harness::new().await?;
    harness.driver.check_for_setup_error().await?;

    let missing_tool = Harness::with_config(BackupConfig {
        diff_mode: DiffMode::Rbd,
        rbd_binary: "volback-missing-rbd-tool".into(),
        ..test_config()
    })
    .await?;
    assert!(matches!(
        missing_tool.driver.check_for_setup_error().await,
        Err(VolbackError::ConfigError(_))
    ));

    let missing_pool = Harness::with_config(BackupConfig {
        backup_pool: "elsewhere".to_string(),
        ..test_config()
    })
    .await?;
    assert!(matches!(
        missing_pool.driver.check_for_setup_error().await,
        Err(VolbackError::ConfigError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_zero_size_volume_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;
    let volume = VolumeRecord::new("empty", 0);
    harness.db.volume_create(volume.clone()).await?;
    harness
        .store
        .create(VOLUME_POOL, &volume.name, 4096, &Default::default())
        .await?;
    let mut backup = harness.new_backup("b1", &volume).await?;
    let mut io = harness.open_volume(&volume).await?;

    let result = harness.driver.backup(&mut backup, &mut io, true).await;
    assert!(matches!(result, Err(VolbackError::InvalidParameter(_))));
    assert!(harness.store.list(BACKUP_POOL).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_backup_id_outside_snapshot_grammar_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;
    let volume = harness.create_volume("v1", 1).await?;
    let mut backup = harness.new_backup("Nightly_1", &volume).await?;
    let mut io = harness.open_volume(&volume).await?;

    let result = harness.driver.backup(&mut backup, &mut io, true).await;
    assert!(matches!(result, Err(VolbackError::InvalidParameter(_))));
    assert_eq!(backup.container, None);
    assert!(harness.store.list(BACKUP_POOL).await?.is_empty());
    assert!(harness.snaps(VOLUME_POOL, &volume.name).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_volume_locks_are_released_after_backup() -> Result<()> {
    let harness = Harness::new().await?;
    let volume = harness.create_volume("v1", 1).await?;

    let mut first = harness.new_backup("b1", &volume).await?;
    let mut io = harness.open_volume(&volume).await?;
    harness.driver.backup(&mut first, &mut io, false).await?;
    assert_eq!(harness.driver.tracked_volume_locks(), 0);

    let mut second = harness.new_backup("b2", &volume).await?;
    let mut third = harness.new_backup("b3", &volume).await?;
    let mut io2 = harness.open_volume(&volume).await?;
    let mut io3 = harness.open_volume(&volume).await?;
    let (r2, r3) = tokio::join!(
        harness.driver.backup(&mut second, &mut io2, false),
        harness.driver.backup(&mut third, &mut io3, false)
    );
    r2?;
    r3?;
    assert_eq!(harness.driver.tracked_volume_locks(), 0);
    assert_eq!(harness.snaps(VOLUME_POOL, &volume.name).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_base_image_creation_options() -> Result<()> {
    let harness = Harness::with_config(BackupConfig {
        stripe_unit: 4 * 1024 * 1024,
        stripe_count: 4,
        image_journals: true,
        ..test_config()
    })
    .await?;
    let volume = harness.create_volume("v1", 1).await?;
    let mut backup = harness.new_backup("b1", &volume).await?;
    let mut io = harness.open_volume(&volume).await?;

    harness.driver.backup(&mut backup, &mut io, false).await?;

    let options = harness
        .store
        .image_options(BACKUP_POOL, "volume-v1.backup.base")
        .await?;
    assert_eq!(
        options.features,
        vec![
            ImageFeature::Layering,
            ImageFeature::StripingV2,
            ImageFeature::ExclusiveLock,
            ImageFeature::Journaling,
        ]
    );
    assert_eq!(options.stripe_unit, 4 * 1024 * 1024);
    assert_eq!(options.stripe_count, 4);
    Ok(())
}

#[tokio::test]
async fn test_file_volume_uses_full_copy() -> Result<()> {
    let harness = Harness::new().await?;
    let volume = VolumeRecord::new("f1", 1);
    harness.db.volume_create(volume.clone()).await?;

    let dir = tempfile::tempdir()?;
    let source_path = dir.path().join("source.img");
    let file = tokio::fs::File::create(&source_path).await?;
    file.set_len(volume.size_bytes()).await?;
    drop(file);
    {
        let mut writer = FileVolumeIo::open(&source_path, true).await?;
        writer.seek(3 * 1024 * 1024).await?;
        writer.write(b"file payload").await?;
        writer.flush().await?;
    }

    let mut backup = harness.new_backup("b1", &volume).await?;
    let mut io = FileVolumeIo::open(&source_path, false).await?;
    harness.driver.backup(&mut backup, &mut io, false).await?;

    assert_eq!(
        backup.recorded_base().as_deref(),
        Some("volume-f1.backup.b1")
    );
    assert!(!harness.store.exists(BACKUP_POOL, "volume-f1.backup.base").await?);

    let base = harness
        .store
        .open(BACKUP_POOL, "volume-f1.backup.b1", None, true)
        .await?;
    assert_eq!(&base.read(3 * 1024 * 1024, 12).await?[..], b"file payload");

    Ok(())
}

#[tokio::test]
async fn test_get_and_put_metadata() -> Result<()> {
    let harness = Harness::new().await?;
    harness.create_volume("v1", 1).await?;
    harness.create_volume("v2", 1).await?;
    harness
        .db
        .volume_metadata_update(
            "v1",
            [("purpose".to_string(), "db".to_string())].into(),
            false,
        )
        .await?;

    let json = harness
        .driver
        .get_metadata("v1")
        .await?
        .expect("metadata present");
    harness.driver.put_metadata("v2", &json).await?;

    assert_eq!(
        harness
            .db
            .volume_metadata_get("v2")
            .await?
            .get("purpose")
            .map(String::as_str),
        Some("db")
    );
    Ok(())
}
