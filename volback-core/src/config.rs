use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// How differential transfers are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// `rbd export-diff | rbd import-diff` child-process pipeline.
    Rbd,
    /// In-process copy over the block store.
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub chunk_size_bytes: u64,
    pub discard_excess_on_restore: bool,
    pub metadata_version: u32,
    pub busy_retry_count: u32,
    pub busy_retry_delay_seconds: u64,
    pub backup_pool: String,
    pub backup_user: String,
    pub backup_conf: Option<PathBuf>,
    pub volume_pool: String,
    pub volume_user: String,
    pub stripe_unit: u64,
    pub stripe_count: u64,
    pub image_journals: bool,
    pub rbd_binary: PathBuf,
    pub diff_mode: DiffMode,
    pub data_dir: Option<PathBuf>,
}

impl BackupConfig {
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: BackupConfig = serde_yaml::from_str(&content)
                .map_err(|e| crate::VolbackError::ConfigError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: Option<&Path>) -> crate::Result<()> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| crate::VolbackError::ConfigError(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> crate::Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            crate::VolbackError::ConfigError("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".volback").join("config.yaml"))
    }

    /// Root of the directory-backed store and state files.
    pub fn data_dir(&self) -> crate::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            crate::VolbackError::ConfigError("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".volback").join("data"))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(crate::VolbackError::ConfigError(
                "chunk_size_bytes must be greater than zero".to_string(),
            ));
        }
        if usize::try_from(self.chunk_size_bytes).is_err() {
            return Err(crate::VolbackError::ConfigError(format!(
                "chunk_size_bytes {} does not fit in memory",
                self.chunk_size_bytes
            )));
        }
        if self.backup_pool.is_empty() {
            return Err(crate::VolbackError::ConfigError(
                "backup_pool must not be empty".to_string(),
            ));
        }
        if !matches!(self.metadata_version, 1 | 2) {
            return Err(crate::VolbackError::ConfigError(format!(
                "Unsupported metadata_version {}",
                self.metadata_version
            )));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> usize {
        usize::try_from(self.chunk_size_bytes).unwrap_or(usize::MAX)
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_secs(self.busy_retry_delay_seconds)
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 128 * MIB,
            discard_excess_on_restore: true,
            metadata_version: 2,
            busy_retry_count: 3,
            busy_retry_delay_seconds: 5,
            backup_pool: "backups".to_string(),
            backup_user: "cinder-backup".to_string(),
            backup_conf: Some(PathBuf::from("/etc/ceph/ceph.conf")),
            volume_pool: "volumes".to_string(),
            volume_user: "cinder".to_string(),
            stripe_unit: 0,
            stripe_count: 0,
            image_journals: false,
            rbd_binary: PathBuf::from("rbd"),
            diff_mode: DiffMode::Rbd,
            data_dir: None,
        }
    }
}
