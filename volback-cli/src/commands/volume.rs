use crate::commands::VolumeAction;
use crate::context::Context;
use crate::output::{OutputFormat, print_info, print_progress, print_success};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use volback_core::{BackupConfig, Result, VolbackError, VolumeDb, VolumeRecord, VolumeType};
use volback_storage::{BlockStore, ChunkedTransfer, CreateOptions, FileVolumeIo};

#[derive(Serialize, Tabled)]
struct VolumeRow {
    id: String,
    name: String,
    size: String,
    status: String,
    #[tabled(rename = "type")]
    volume_type: String,
    encrypted: bool,
    bootable: bool,
}

impl From<VolumeRecord> for VolumeRow {
    fn from(volume: VolumeRecord) -> Self {
        VolumeRow {
            id: volume.id,
            name: volume.display_name.unwrap_or_else(|| "-".to_string()),
            size: format!("{}GB", volume.size_gb),
            status: volume.status,
            volume_type: volume.volume_type_id.unwrap_or_else(|| "-".to_string()),
            encrypted: volume.encryption_key_id.is_some(),
            bootable: volume.bootable,
        }
    }
}

pub async fn execute(action: VolumeAction, config: BackupConfig, format: OutputFormat) -> Result<()> {
    let ctx = Context::open(config).await?;

    match action {
        VolumeAction::Create {
            size,
            id,
            name,
            volume_type,
            encrypted,
            from_file,
        } => {
            if size == 0 {
                return Err(VolbackError::InvalidParameter(
                    "Volume size must be at least 1GB".to_string(),
                ));
            }
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut volume = VolumeRecord::new(&id, size);
            volume.display_name = name;

            if let Some(type_id) = volume_type {
                if ctx.db.volume_type_get(&type_id).await.is_err() {
                    print_info(&format!("Creating volume type '{type_id}'"));
                    ctx.db
                        .volume_type_create(VolumeType {
                            id: type_id.clone(),
                            name: type_id.clone(),
                            encrypted,
                        })
                        .await?;
                }
                volume.volume_type_id = Some(type_id);
            }
            if encrypted {
                let secret = uuid::Uuid::new_v4().simple().to_string();
                volume.encryption_key_id = Some(ctx.keys.store(secret).await?);
            }

            ctx.store
                .create(
                    &ctx.config.volume_pool,
                    &volume.name,
                    volume.size_bytes(),
                    &CreateOptions::default(),
                )
                .await?;
            ctx.db.volume_create(volume.clone()).await?;

            if let Some(path) = from_file {
                import_file(&ctx, &volume, &path).await?;
            }

            print_success(&format!("Volume '{id}' created ({size}GB)"));
            println!("{}", format.document(&VolumeRow::from(volume)));
        }
        VolumeAction::List => {
            let volumes = ctx.db.volume_list().await?;
            if volumes.is_empty() {
                print_info("No volumes found. Run 'volback volume create --size <GB>' to create one.");
            } else {
                let rows: Vec<VolumeRow> = volumes.into_iter().map(VolumeRow::from).collect();
                println!("{}", format.rows(rows));
            }
        }
    }

    Ok(())
}

async fn import_file(ctx: &Context, volume: &VolumeRecord, path: &Path) -> Result<()> {
    let length = tokio::fs::metadata(path).await?.len();
    if length > volume.size_bytes() {
        return Err(VolbackError::InvalidParameter(format!(
            "File {:?} ({} bytes) does not fit in volume {} ({} bytes)",
            path,
            length,
            volume.id,
            volume.size_bytes()
        )));
    }

    print_progress(&format!("Importing {length} bytes from {path:?}"));
    let mut src = FileVolumeIo::open(path, false).await?;
    let mut dest = ctx.open_volume(volume).await?;
    ChunkedTransfer::from_config(&ctx.config)
        .transfer(
            &mut src,
            &path.display().to_string(),
            &mut dest,
            &volume.name,
            length,
        )
        .await
}
