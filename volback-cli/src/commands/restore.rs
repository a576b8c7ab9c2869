use crate::context::Context;
use crate::output::{OutputFormat, print_progress, print_success};
use volback_core::{BackupConfig, BackupStatus, BackupUpdate, Result, VolbackError, VolumeDb};

pub async fn execute(
    backup_id: String,
    volume: Option<String>,
    config: BackupConfig,
    _format: OutputFormat,
) -> Result<()> {
    let ctx = Context::open(config).await?;
    let backup = ctx.db.backup_get(&backup_id).await?;
    if backup.status != BackupStatus::Available {
        return Err(VolbackError::InvalidParameter(format!(
            "Backup '{backup_id}' is {} and cannot be restored",
            backup.status
        )));
    }

    let volume_id = volume.unwrap_or_else(|| backup.volume_id.clone());
    let target = ctx.db.volume_get(&volume_id).await?;

    print_progress(&format!(
        "Restoring backup '{backup_id}' to volume '{volume_id}'"
    ));
    set_status(&ctx, &backup_id, BackupStatus::Restoring).await?;

    let mut dest = ctx.open_volume(&target).await?;
    let result = ctx.driver.restore(&backup, &target.id, &mut dest).await;
    set_status(&ctx, &backup_id, BackupStatus::Available).await?;
    result?;

    print_success(&format!(
        "Backup '{backup_id}' restored to volume '{volume_id}'"
    ));
    Ok(())
}

async fn set_status(ctx: &Context, backup_id: &str, status: BackupStatus) -> Result<()> {
    ctx.db
        .backup_update(
            backup_id,
            BackupUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
}
