use crate::context::Context;
use crate::output::{OutputFormat, print_progress, print_success, print_warning};
use serde_json::json;
use volback_core::{BackupConfig, BackupRecord, BackupStatus, BackupUpdate, Result, VolumeDb};

pub async fn execute(
    volume_id: String,
    id: Option<String>,
    backup_metadata: bool,
    config: BackupConfig,
    format: OutputFormat,
) -> Result<()> {
    let ctx = Context::open(config).await?;
    let volume = ctx.db.volume_get(&volume_id).await?;

    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut backup = BackupRecord::new(&id, &volume.id, volume.size_gb);
    ctx.db.backup_create(backup.clone()).await?;

    print_progress(&format!("Backing up volume '{volume_id}' as backup '{id}'"));
    if !backup_metadata {
        print_warning("Volume metadata will not be backed up");
    }
    let mut source = ctx.open_volume(&volume).await?;
    let result = ctx
        .driver
        .backup(&mut backup, &mut source, backup_metadata)
        .await;

    let status = if result.is_ok() {
        BackupStatus::Available
    } else {
        BackupStatus::Error
    };
    ctx.db
        .backup_update(
            &id,
            BackupUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await?;
    result?;

    print_success(&format!("Backup '{id}' of volume '{volume_id}' completed"));
    println!(
        "{}",
        format.document(&json!({
            "id": id,
            "volume_id": volume_id,
            "container": backup.container,
            "base": backup.recorded_base(),
        }))
    );
    Ok(())
}
