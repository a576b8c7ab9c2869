use crate::context::Context;
use crate::output::{OutputFormat, print_info};
use volback_core::{BackupConfig, Result};

pub async fn execute(volume_id: String, config: BackupConfig, format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;

    match ctx.driver.get_metadata(&volume_id).await? {
        Some(json_meta) => {
            let document: serde_json::Value = serde_json::from_str(&json_meta)?;
            println!("{}", format.document(&document));
        }
        None => print_info(&format!("Volume '{volume_id}' has no metadata to back up.")),
    }
    Ok(())
}
