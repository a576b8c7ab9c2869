use crate::commands::ConfigAction;
use crate::output::{OutputFormat, print_success};
use volback_core::{BackupConfig, Result};

pub async fn execute(action: ConfigAction, config: BackupConfig, format: OutputFormat) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", format.document(&config));
        }
        ConfigAction::Init { path } => {
            let path = match path {
                Some(path) => path,
                None => BackupConfig::config_path()?,
            };
            config.save(Some(&path))?;
            print_success(&format!("Configuration written to {}", path.display()));
        }
    }
    Ok(())
}
