use crate::context::Context;
use crate::output::{OutputFormat, print_success};
use volback_core::{BackupConfig, Result};

pub async fn execute(config: BackupConfig, _format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;
    ctx.driver.check_for_setup_error().await?;

    print_success(&format!(
        "Backup pool '{}' is reachable and the {:?} diff mode is usable",
        ctx.config.backup_pool, ctx.config.diff_mode
    ));
    Ok(())
}
