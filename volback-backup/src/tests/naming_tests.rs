use crate::naming::{
    BackupSnap, backup_snaps, base_name, diff_base_name, list_backup_snapshots,
    most_recent_snapshot, new_snapshot_name, snapshot_for_backup, validate_backup_id,
};
use volback_core::{Result, VolbackError};
use volback_storage::{BlockStore, CreateOptions, MemoryBlockStore, SnapInfo};

fn snap_infos(names: &[&str]) -> Vec<SnapInfo> {
    names
        .iter()
        .map(|name| SnapInfo {
            name: name.to_string(),
            size: 0,
        })
        .collect()
}

#[test]
fn test_base_names() -> Result<()> {
    assert_eq!(diff_base_name("v1"), "volume-v1.backup.base");
    assert_eq!(base_name("v1", None, true)?, "volume-v1.backup.base");
    assert_eq!(base_name("v1", Some("b1"), true)?, "volume-v1.backup.base");
    assert_eq!(base_name("v1", Some("b1"), false)?, "volume-v1.backup.b1");
    assert!(matches!(
        base_name("v1", None, false),
        Err(VolbackError::InvalidParameter(_))
    ));
    Ok(())
}

#[test]
fn test_new_snapshot_name_is_parseable_and_distinct() {
    let first = new_snapshot_name("backup-1");
    let second = new_snapshot_name("backup-1");
    assert_ne!(first, second);

    let parsed = BackupSnap::parse(&first).expect("generated name parses");
    assert_eq!(parsed.backup_id, "backup-1");
    assert!(first.starts_with("backup.backup-1.snap."));

    let later = BackupSnap::parse(&second).expect("generated name parses");
    assert!(later.timestamp.parse::<f64>().is_ok());
    let sorted = backup_snaps(&snap_infos(&[&first, &second]), true);
    assert_eq!(sorted[0].name, second);
}

#[test]
fn test_parse_rejects_foreign_names() {
    for name in [
        "user-snapshot",
        "backup..snap.1",
        "backup.Upper.snap.1",
        "backup.b1.snap.",
        "backup.b_1.snap.1",
        "snap.backup.b1.snap.1",
    ] {
        assert!(BackupSnap::parse(name).is_none(), "{name} should not parse");
    }

    let snap = BackupSnap::parse("backup.0a-b.snap.1700000000.123456").expect("valid name");
    assert_eq!(snap.backup_id, "0a-b");
    assert_eq!(snap.timestamp, "1700000000.123456");
}

#[test]
fn test_backup_id_validation_matches_snapshot_grammar() -> Result<()> {
    for id in ["b1", "0a-b", "5f0c7a6e-7c1d-4c39-9a47-2f1b2c3d4e5f"] {
        validate_backup_id(id)?;
        let snap = BackupSnap::parse(&new_snapshot_name(id)).expect("valid id parses back");
        assert_eq!(snap.backup_id, id);
    }

    for id in ["", "Nightly_1", "b.1", "b 1", "b1.snap.2"] {
        assert!(
            matches!(validate_backup_id(id), Err(VolbackError::InvalidParameter(_))),
            "{id:?} should be rejected"
        );
        assert!(BackupSnap::parse(&new_snapshot_name(id)).is_none_or(|s| s.backup_id != id));
    }
    Ok(())
}

#[test]
fn test_sort_is_numeric_and_descending() {
    let snaps = backup_snaps(
        &snap_infos(&[
            "backup.a.snap.9.5",
            "unrelated",
            "backup.b.snap.10.000001",
            "backup.c.snap.2.0",
        ]),
        true,
    );
    let ids: Vec<&str> = snaps.iter().map(|s| s.backup_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);

    let unsorted = backup_snaps(&snap_infos(&["backup.a.snap.1", "backup.b.snap.2"]), false);
    assert_eq!(unsorted[0].backup_id, "a");
}

#[tokio::test]
async fn test_image_lookups() -> Result<()> {
    let store = MemoryBlockStore::with_pools(&["backups"]).await;
    store
        .create("backups", "base", 1024 * 1024, &CreateOptions::default())
        .await?;
    let image = store.open("backups", "base", None, false).await?;

    assert_eq!(most_recent_snapshot(image.as_ref()).await?, None);
    assert_eq!(snapshot_for_backup(image.as_ref(), "base", "b1").await?, None);

    image.create_snap("manual").await?;
    image.create_snap("backup.b1.snap.100.000000").await?;
    image.create_snap("backup.b2.snap.200.000000").await?;

    assert_eq!(list_backup_snapshots(image.as_ref(), false).await?.len(), 2);
    assert_eq!(
        most_recent_snapshot(image.as_ref()).await?.as_deref(),
        Some("backup.b2.snap.200.000000")
    );
    assert_eq!(
        snapshot_for_backup(image.as_ref(), "base", "b1").await?.as_deref(),
        Some("backup.b1.snap.100.000000")
    );
    assert_eq!(snapshot_for_backup(image.as_ref(), "base", "b3").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_backup_snapshots_are_fatal() -> Result<()> {
    let store = MemoryBlockStore::with_pools(&["backups"]).await;
    store
        .create("backups", "base", 1024 * 1024, &CreateOptions::default())
        .await?;
    let image = store.open("backups", "base", None, false).await?;
    image.create_snap("backup.b1.snap.100.000000").await?;
    image.create_snap("backup.b1.snap.200.000000").await?;

    let err = snapshot_for_backup(image.as_ref(), "base", "b1")
        .await
        .expect_err("two snapshots for one backup");
    assert!(err.is_operation_failure());
    assert!(!err.is_recoverable());
    Ok(())
}
