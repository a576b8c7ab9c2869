//! Names of backup base images and backup snapshots, and lookup of the
//! snapshots that belong to the backup chain of an image.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, error};
use volback_core::{Result, VolbackError};
use volback_storage::{Image, SnapInfo};

const SNAP_PREFIX: &str = "backup.";
const SNAP_INFIX: &str = ".snap.";

static LAST_SNAP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Backup snapshot parsed from `backup.<backup_id>.snap.<timestamp>`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSnap {
    pub name: String,
    pub backup_id: String,
    pub timestamp: String,
}

impl BackupSnap {
    pub fn parse(name: &str) -> Option<Self> {
        let (backup_id, timestamp) = name.strip_prefix(SNAP_PREFIX)?.split_once(SNAP_INFIX)?;
        if !is_valid_backup_id(backup_id) || timestamp.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            backup_id: backup_id.to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    fn sort_key(&self) -> f64 {
        self.timestamp.parse().unwrap_or(f64::NEG_INFINITY)
    }
}

/// Backup ids are non-empty `[a-z0-9-]` strings, the only form snapshot names parse back.
pub fn is_valid_backup_id(backup_id: &str) -> bool {
    !backup_id.is_empty()
        && backup_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn validate_backup_id(backup_id: &str) -> Result<()> {
    if !is_valid_backup_id(backup_id) {
        return Err(VolbackError::InvalidParameter(format!(
            "Backup id '{backup_id}' must be non-empty and contain only lowercase letters, digits and '-'"
        )));
    }
    Ok(())
}

/// Shared base image holding every incremental backup of a volume.
pub fn diff_base_name(volume_id: &str) -> String {
    format!("volume-{volume_id}.backup.base")
}

pub fn base_name(volume_id: &str, backup_id: Option<&str>, diff_format: bool) -> Result<String> {
    if diff_format {
        return Ok(diff_base_name(volume_id));
    }
    let backup_id = backup_id.ok_or_else(|| {
        VolbackError::InvalidParameter("Backup id required for full-format base name".to_string())
    })?;
    Ok(format!("volume-{volume_id}.backup.{backup_id}"))
}

/// `backup.<backup_id>.snap.<seconds>.<micros>`; timestamps never repeat within a process.
pub fn new_snapshot_name(backup_id: &str) -> String {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_SNAP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    let micros = now.max(previous + 1);
    format!(
        "{SNAP_PREFIX}{backup_id}{SNAP_INFIX}{}.{:06}",
        micros / 1_000_000,
        micros % 1_000_000
    )
}

/// Keeps the backup snapshots among `snaps`, newest first when `sort` is set.
pub fn backup_snaps(snaps: &[SnapInfo], sort: bool) -> Vec<BackupSnap> {
    let mut found: Vec<BackupSnap> = snaps
        .iter()
        .filter_map(|snap| BackupSnap::parse(&snap.name))
        .collect();
    if sort {
        found.sort_by(|a, b| b.sort_key().total_cmp(&a.sort_key()));
    }
    found
}

pub async fn list_backup_snapshots(image: &dyn Image, sort: bool) -> Result<Vec<BackupSnap>> {
    Ok(backup_snaps(&image.list_snaps().await?, sort))
}

pub async fn most_recent_snapshot(image: &dyn Image) -> Result<Option<String>> {
    Ok(list_backup_snapshots(image, true)
        .await?
        .into_iter()
        .next()
        .map(|snap| snap.name))
}

/// Snapshot of `backup_id` on the image. More than one match is a corrupt chain.
pub async fn snapshot_for_backup(
    image: &dyn Image,
    base_name: &str,
    backup_id: &str,
) -> Result<Option<String>> {
    debug!("Looking for snapshot of backup base '{}'", base_name);
    let snaps = list_backup_snapshots(image, false).await?;
    if snaps.is_empty() {
        debug!("Backup base '{}' has no snapshots", base_name);
        return Ok(None);
    }

    let mut matches: Vec<String> = snaps
        .into_iter()
        .filter(|snap| snap.backup_id == backup_id)
        .map(|snap| snap.name)
        .collect();
    match matches.len() {
        0 => {
            debug!("Backup '{}' has no snapshot", backup_id);
            Ok(None)
        }
        1 => {
            let snap = matches.remove(0);
            debug!("Found snapshot '{}'", snap);
            Ok(Some(snap))
        }
        count => {
            let msg = format!("Backup should only have one snapshot but instead has {count}");
            error!("{} (backup {}, base {})", msg, backup_id, base_name);
            Err(VolbackError::fatal("backup snapshot lookup", msg))
        }
    }
}
