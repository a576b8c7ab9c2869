mod backup;
mod check;
mod config;
mod delete;
mod list;
mod metadata;
mod restore;
mod volume;

use clap::Subcommand;
use std::path::PathBuf;
use volback_core::{BackupConfig, Result};

use crate::output::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage volumes in the volume pool
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },

    /// Back up a volume, incrementally when a previous backup exists
    Backup {
        /// Volume to back up
        volume_id: String,

        /// Backup id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Skip the volume metadata backup
        #[arg(long)]
        no_metadata: bool,
    },

    /// Restore a backup into a volume
    Restore {
        /// Backup to restore
        backup_id: String,

        /// Target volume (defaults to the backed up volume)
        #[arg(long)]
        volume: Option<String>,
    },

    /// Delete a backup
    Delete {
        /// Backup to delete
        backup_id: String,
    },

    /// List backups
    Backups {
        /// Only show backups of this volume
        #[arg(long)]
        volume: Option<String>,
    },

    /// List the backup snapshots on a volume's diff base image
    Snapshots {
        /// Volume whose backup chain to show
        volume_id: String,
    },

    /// Show the metadata document a backup of the volume would store
    Metadata {
        /// Volume to inspect
        volume_id: String,
    },

    /// Verify configuration, pool access and the diff tool
    Check,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum VolumeAction {
    /// Create a volume
    Create {
        /// Size in GB
        #[arg(long)]
        size: u64,

        /// Volume id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Volume type id; created on first use
        #[arg(long)]
        volume_type: Option<String>,

        /// Attach a freshly generated encryption key
        #[arg(long)]
        encrypted: bool,

        /// Fill the volume from this file
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// List volumes
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Write the effective configuration to a configuration file
    Init {
        /// Destination (default: ~/.volback/config.yaml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub async fn execute(command: Command, config: BackupConfig, format: OutputFormat) -> Result<()> {
    match command {
        Command::Volume { action } => volume::execute(action, config, format).await,
        Command::Backup {
            volume_id,
            id,
            no_metadata,
        } => backup::execute(volume_id, id, !no_metadata, config, format).await,
        Command::Restore { backup_id, volume } => {
            restore::execute(backup_id, volume, config, format).await
        }
        Command::Delete { backup_id } => delete::execute(backup_id, config, format).await,
        Command::Backups { volume } => list::backups(volume, config, format).await,
        Command::Snapshots { volume_id } => list::snapshots(volume_id, config, format).await,
        Command::Metadata { volume_id } => metadata::execute(volume_id, config, format).await,
        Command::Check => check::execute(config, format).await,
        Command::Config { action } => config::execute(action, config, format).await,
    }
}
