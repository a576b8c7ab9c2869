use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Creating,
    Available,
    Restoring,
    Deleting,
    Error,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Creating => write!(f, "creating"),
            BackupStatus::Available => write!(f, "available"),
            BackupStatus::Restoring => write!(f, "restoring"),
            BackupStatus::Deleting => write!(f, "deleting"),
            BackupStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub volume_id: String,
    pub status: BackupStatus,
    /// Pool holding the backup data.
    pub container: Option<String>,
    pub size_gb: u64,
    pub parent_id: Option<String>,
    /// JSON document, `{"base": "<image>"}` once the data backup completed.
    pub service_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ServiceMetadata {
    base: Option<String>,
}

impl BackupRecord {
    pub fn new(id: impl Into<String>, volume_id: impl Into<String>, size_gb: u64) -> Self {
        Self {
            id: id.into(),
            volume_id: volume_id.into(),
            status: BackupStatus::Creating,
            container: None,
            size_gb,
            parent_id: None,
            service_metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Base image name recorded in service metadata, if any.
    pub fn recorded_base(&self) -> Option<String> {
        let raw = self.service_metadata.as_deref()?;
        serde_json::from_str::<ServiceMetadata>(raw).ok()?.base
    }

    pub fn service_metadata_for(base: &str) -> String {
        serde_json::json!({ "base": base }).to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupUpdate {
    pub status: Option<BackupStatus>,
    pub container: Option<String>,
    pub service_metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    /// Backend image name, `volume-<id>`.
    pub name: String,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    pub size_gb: u64,
    pub status: String,
    pub volume_type_id: Option<String>,
    pub encryption_key_id: Option<String>,
    pub bootable: bool,
    pub availability_zone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VolumeRecord {
    pub fn new(id: impl Into<String>, size_gb: u64) -> Self {
        let id = id.into();
        Self {
            name: format!("volume-{id}"),
            id,
            display_name: None,
            display_description: None,
            size_gb,
            status: "available".to_string(),
            volume_type_id: None,
            encryption_key_id: None,
            bootable: false,
            availability_zone: None,
            created_at: Utc::now(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_gb * GIB
    }
}

/// Partial update of a volume record; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeUpdate {
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    pub volume_type_id: Option<String>,
    pub encryption_key_id: Option<Option<String>>,
    pub bootable: Option<bool>,
    pub status: Option<String>,
}

impl VolumeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == VolumeUpdate::default()
    }

    pub fn apply(self, volume: &mut VolumeRecord) {
        if let Some(display_name) = self.display_name {
            volume.display_name = Some(display_name);
        }
        if let Some(description) = self.display_description {
            volume.display_description = Some(description);
        }
        if let Some(type_id) = self.volume_type_id {
            volume.volume_type_id = Some(type_id);
        }
        if let Some(key_id) = self.encryption_key_id {
            volume.encryption_key_id = key_id;
        }
        if let Some(bootable) = self.bootable {
            volume.bootable = bootable;
        }
        if let Some(status) = self.status {
            volume.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeType {
    pub id: String,
    pub name: String,
    pub encrypted: bool,
}
