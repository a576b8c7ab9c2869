use crate::context::Context;
use crate::output::{OutputFormat, print_info};
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;
use volback_backup::naming;
use volback_core::{BackupConfig, BackupRecord, BackupStatus, Result, VolbackError};
use volback_storage::BlockStore;

#[derive(Serialize, Tabled)]
struct BackupRow {
    id: String,
    #[tabled(display_with = "status_cell")]
    status: BackupStatus,
    container: String,
    base: String,
    created: String,
}

fn status_cell(status: &BackupStatus) -> String {
    match status {
        BackupStatus::Available => "available".green().to_string(),
        BackupStatus::Creating => "creating".cyan().to_string(),
        BackupStatus::Restoring => "restoring".cyan().to_string(),
        BackupStatus::Deleting => "deleting".yellow().to_string(),
        BackupStatus::Error => "error".red().bold().to_string(),
    }
}

impl From<BackupRecord> for BackupRow {
    fn from(backup: BackupRecord) -> Self {
        BackupRow {
            base: backup.recorded_base().unwrap_or_else(|| "-".to_string()),
            id: backup.id,
            status: backup.status,
            container: backup.container.unwrap_or_else(|| "-".to_string()),
            created: backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Backups keyed by volume, oldest first within each volume.
fn group_by_volume(backups: Vec<BackupRecord>) -> BTreeMap<String, Vec<BackupRow>> {
    let mut grouped: BTreeMap<String, Vec<BackupRecord>> = BTreeMap::new();
    for backup in backups {
        grouped.entry(backup.volume_id.clone()).or_default().push(backup);
    }
    grouped
        .into_iter()
        .map(|(volume_id, mut records)| {
            records.sort_by_key(|b| b.created_at);
            (volume_id, records.into_iter().map(BackupRow::from).collect())
        })
        .collect()
}

fn render_backups(grouped: BTreeMap<String, Vec<BackupRow>>, format: OutputFormat) -> String {
    if !format.is_table() {
        return format.document(&grouped);
    }

    let mut sections = Vec::with_capacity(grouped.len());
    for (volume_id, rows) in grouped {
        let count = rows.len();
        sections.push(format!(
            "{} ({} backup{})\n{}",
            format!("volume {volume_id}").bold(),
            count,
            if count == 1 { "" } else { "s" },
            format.rows(rows)
        ));
    }
    sections.join("\n\n")
}

#[derive(Serialize, Tabled)]
struct SnapshotRow {
    name: String,
    backup_id: String,
    taken: String,
}

pub async fn backups(volume: Option<String>, config: BackupConfig, format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;
    let backups: Vec<BackupRecord> = ctx
        .db
        .backup_list()
        .await?
        .into_iter()
        .filter(|b| volume.as_deref().is_none_or(|v| b.volume_id == v))
        .collect();

    if backups.is_empty() {
        print_info("No backups found.");
        return Ok(());
    }
    println!("{}", render_backups(group_by_volume(backups), format));
    Ok(())
}

pub async fn snapshots(volume_id: String, config: BackupConfig, format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;
    let base_name = naming::diff_base_name(&volume_id);

    let image = match ctx
        .store
        .open(&ctx.config.backup_pool, &base_name, None, true)
        .await
    {
        Ok(image) => image,
        Err(VolbackError::ImageNotFound(_)) => {
            print_info(&format!(
                "Volume '{volume_id}' has no incremental backup chain."
            ));
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let rows: Vec<SnapshotRow> = naming::list_backup_snapshots(image.as_ref(), true)
        .await?
        .into_iter()
        .map(|snap| SnapshotRow {
            taken: format_timestamp(&snap.timestamp),
            name: snap.name,
            backup_id: snap.backup_id,
        })
        .collect();

    if rows.is_empty() {
        print_info(&format!("Base image '{base_name}' holds no backup snapshots."));
        return Ok(());
    }
    if format.is_table() {
        println!("Base image: {}", base_name.bold());
    }
    println!("{}", format.rows(rows));
    Ok(())
}

/// Renders `<seconds>.<micros>` as UTC time, or returns it unchanged.
fn format_timestamp(timestamp: &str) -> String {
    let seconds = timestamp.split('.').next().and_then(|s| s.parse::<i64>().ok());
    match seconds.and_then(|s| chrono::DateTime::from_timestamp(s, 0)) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}
