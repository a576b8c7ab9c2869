use crate::{BlockStore, CreateOptions, LocalBlockStore};
use tempfile::TempDir;
use volback_core::{Result, VolbackError};

async fn store() -> Result<(TempDir, LocalBlockStore)> {
    let dir = tempfile::tempdir()?;
    let store = LocalBlockStore::new(dir.path().join("pools"));
    store.init(&["volumes", "backups"]).await?;
    Ok((dir, store))
}

#[tokio::test]
async fn test_image_lifecycle() -> Result<()> {
    let (_dir, store) = store().await?;
    store
        .create("volumes", "volume-1", 256 * 1024, &CreateOptions::default())
        .await?;
    assert_eq!(store.list("volumes").await?, vec!["volume-1".to_string()]);

    {
        let image = store.open("volumes", "volume-1", None, false).await?;
        image.write(b"payload", 4096).await?;
        image.flush().await?;
        assert_eq!(&image.read(4096, 7).await?[..], b"payload");
        assert_eq!(image.allocated_extents().await?.len(), 1);

        // Open writable handles keep the image busy.
        assert!(matches!(
            store.remove("volumes", "volume-1").await,
            Err(VolbackError::ImageBusy(_))
        ));
    }

    store.remove("volumes", "volume-1").await?;
    assert!(!store.exists("volumes", "volume-1").await?);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_duplicates_and_bad_names() -> Result<()> {
    let (_dir, store) = store().await?;
    store
        .create("volumes", "volume-1", 1024, &CreateOptions::default())
        .await?;

    assert!(matches!(
        store
            .create("volumes", "volume-1", 1024, &CreateOptions::default())
            .await,
        Err(VolbackError::ImageExists(_))
    ));
    assert!(matches!(
        store
            .create("volumes", "../escape", 1024, &CreateOptions::default())
            .await,
        Err(VolbackError::InvalidParameter(_))
    ));
    assert!(matches!(
        store
            .create("missing", "volume-2", 1024, &CreateOptions::default())
            .await,
        Err(VolbackError::PoolNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_snapshots_and_resize() -> Result<()> {
    let (_dir, store) = store().await?;
    store
        .create("volumes", "volume-1", 128 * 1024, &CreateOptions::default())
        .await?;
    let image = store.open("volumes", "volume-1", None, false).await?;

    image.write(b"before", 0).await?;
    image.create_snap("backup.b1.snap.1.000001").await?;
    image.write(b"after!", 0).await?;
    image.resize(64 * 1024).await?;

    let snap = store
        .open("volumes", "volume-1", Some("backup.b1.snap.1.000001"), false)
        .await?;
    assert_eq!(snap.size().await?, 128 * 1024);
    assert_eq!(&snap.read(0, 6).await?[..], b"before");
    assert!(snap.write(b"x", 0).await.is_err());

    assert_eq!(image.size().await?, 64 * 1024);
    let snaps = image.list_snaps().await?;
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].size, 128 * 1024);

    image.remove_snap("backup.b1.snap.1.000001").await?;
    assert!(matches!(
        image.remove_snap("backup.b1.snap.1.000001").await,
        Err(VolbackError::SnapshotNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_discard_zeroes_range() -> Result<()> {
    let (_dir, store) = store().await?;
    store
        .create("volumes", "volume-1", 3 * 1024 * 1024, &CreateOptions::default())
        .await?;
    let image = store.open("volumes", "volume-1", None, false).await?;

    image.write(&[5u8; 4096], 2 * 1024 * 1024).await?;
    image.discard(0, 3 * 1024 * 1024).await?;
    assert!(!image.has_extents().await?);
    Ok(())
}

#[tokio::test]
async fn test_objects() -> Result<()> {
    let (_dir, store) = store().await?;

    store
        .write_object("backups", "backup.b1.meta", br#"{"version":2}"#)
        .await?;
    assert!(store.object_exists("backups", "backup.b1.meta").await?);
    assert_eq!(
        &store.read_object("backups", "backup.b1.meta").await?[..],
        br#"{"version":2}"#
    );

    store.remove_object("backups", "backup.b1.meta").await?;
    assert!(matches!(
        store.remove_object("backups", "backup.b1.meta").await,
        Err(VolbackError::ObjectNotFound(_))
    ));
    Ok(())
}
