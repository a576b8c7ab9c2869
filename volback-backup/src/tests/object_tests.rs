use crate::VolumeMetadataBackup;
use std::sync::Arc;
use volback_core::{Result, VolbackError};
use volback_storage::MemoryBlockStore;

#[tokio::test]
async fn test_metadata_object_is_write_once() -> Result<()> {
    let store = MemoryBlockStore::with_pools(&["backups"]).await;
    let object = VolumeMetadataBackup::new(Arc::new(store), "backups", "b1");
    assert_eq!(object.name(), "backup.b1.meta");

    assert!(!object.exists().await?);
    assert_eq!(object.get().await?, None);

    object.set(r#"{"version":2}"#).await?;
    assert!(object.exists().await?);

    let second = object.set(r#"{"version":1}"#).await;
    assert!(matches!(second, Err(VolbackError::MetadataBackupExists(_))));
    assert_eq!(object.get().await?.as_deref(), Some(r#"{"version":2}"#));
    Ok(())
}

#[tokio::test]
async fn test_remove_if_exists_is_idempotent() -> Result<()> {
    let store = MemoryBlockStore::with_pools(&["backups"]).await;
    let object = VolumeMetadataBackup::new(Arc::new(store), "backups", "b1");

    object.remove_if_exists().await?;
    object.set("{}").await?;
    object.remove_if_exists().await?;
    object.remove_if_exists().await?;
    assert!(!object.exists().await?);
    Ok(())
}

#[tokio::test]
async fn test_missing_pool_propagates() {
    let store = MemoryBlockStore::new();
    let object = VolumeMetadataBackup::new(Arc::new(store), "backups", "b1");

    assert!(matches!(
        object.remove_if_exists().await,
        Err(VolbackError::PoolNotFound(_))
    ));
}
