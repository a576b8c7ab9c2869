use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolbackError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A backend operation did not complete. `recoverable` marks failures that
    /// callers with a fallback (incremental to full backup, diff to full restore)
    /// are expected to absorb.
    #[error("Operation {operation} failed: {message}")]
    OperationFailed {
        operation: String,
        message: String,
        recoverable: bool,
    },

    #[error("Image {0} not found")]
    ImageNotFound(String),

    #[error("Image {0} already exists")]
    ImageExists(String),

    #[error("Image {0} is busy")]
    ImageBusy(String),

    #[error("Snapshot {snapshot} of image {image} not found")]
    SnapshotNotFound { image: String, snapshot: String },

    #[error("Pool {0} not found")]
    PoolNotFound(String),

    #[error("Object {0} not found")]
    ObjectNotFound(String),

    #[error("Volume {0} not found")]
    VolumeNotFound(String),

    #[error("Backup {0} not found")]
    BackupNotFound(String),

    #[error("Volume type {0} not found")]
    VolumeTypeNotFound(String),

    #[error("Glance metadata not found for volume {0}")]
    GlanceMetadataNotFound(String),

    #[error("Key {0} not found")]
    KeyNotFound(String),

    #[error("Metadata backup object {0} already exists")]
    MetadataBackupExists(String),

    #[error("Unsupported backup metadata version ({0})")]
    UnsupportedMetadataVersion(i64),

    #[error("Encrypted backup operation failed: {0}")]
    EncryptedBackupFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VolbackError {
    /// Failure that a fallback path may recover from.
    pub fn recoverable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        VolbackError::OperationFailed {
            operation: operation.into(),
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        VolbackError::OperationFailed {
            operation: operation.into(),
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VolbackError::OperationFailed {
                recoverable: true,
                ..
            }
        )
    }

    pub fn is_operation_failure(&self) -> bool {
        matches!(self, VolbackError::OperationFailed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VolbackError::ImageNotFound(_)
                | VolbackError::SnapshotNotFound { .. }
                | VolbackError::PoolNotFound(_)
                | VolbackError::ObjectNotFound(_)
                | VolbackError::VolumeNotFound(_)
                | VolbackError::BackupNotFound(_)
                | VolbackError::VolumeTypeNotFound(_)
                | VolbackError::GlanceMetadataNotFound(_)
                | VolbackError::KeyNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VolbackError>;
