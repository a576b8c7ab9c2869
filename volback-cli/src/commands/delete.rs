use crate::context::Context;
use crate::output::{OutputFormat, print_progress, print_success};
use volback_core::{BackupConfig, BackupStatus, BackupUpdate, Result, VolumeDb};

pub async fn execute(backup_id: String, config: BackupConfig, _format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;
    let backup = ctx.db.backup_get(&backup_id).await?;

    print_progress(&format!("Deleting backup '{backup_id}'"));
    ctx.db
        .backup_update(
            &backup_id,
            BackupUpdate {
                status: Some(BackupStatus::Deleting),
                ..Default::default()
            },
        )
        .await?;

    if let Err(e) = ctx.driver.delete(&backup).await {
        ctx.db
            .backup_update(
                &backup_id,
                BackupUpdate {
                    status: Some(BackupStatus::Error),
                    ..Default::default()
                },
            )
            .await?;
        return Err(e);
    }
    ctx.db.backup_destroy(&backup_id).await?;

    print_success(&format!("Backup '{backup_id}' deleted"));
    Ok(())
}
