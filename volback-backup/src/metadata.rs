//! Versioned backup of volume metadata, restored selectively alongside the volume data.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use volback_core::{KeyManager, Result, VolbackError, VolumeDb, VolumeUpdate};

pub const TYPE_TAG_VOL_BASE_META: &str = "volume-base-metadata";
pub const TYPE_TAG_VOL_META: &str = "volume-metadata";
pub const TYPE_TAG_VOL_GLANCE_META: &str = "volume-glance-metadata";

const VERSION_KEY: &str = "version";
const ENCRYPTION_KEY_ID: &str = "encryption_key_id";
const VOLUME_TYPE_ID: &str = "volume_type_id";

type Section = Map<String, Value>;

#[derive(Debug, Clone, Copy)]
enum SectionRestore {
    /// Base volume fields, limited to the listed ones.
    Base(&'static [&'static str]),
    Meta,
    Glance,
}

fn restore_factory(version: i64) -> Result<Vec<(&'static str, SectionRestore)>> {
    match version {
        1 => Ok(vec![
            (TYPE_TAG_VOL_META, SectionRestore::Meta),
            (TYPE_TAG_VOL_GLANCE_META, SectionRestore::Glance),
        ]),
        2 => Ok(vec![
            (
                TYPE_TAG_VOL_BASE_META,
                SectionRestore::Base(&[ENCRYPTION_KEY_ID]),
            ),
            (TYPE_TAG_VOL_META, SectionRestore::Meta),
            (TYPE_TAG_VOL_GLANCE_META, SectionRestore::Glance),
        ]),
        other => Err(VolbackError::UnsupportedMetadataVersion(other)),
    }
}

/// Builds a section from the entries that serialize to JSON; the rest are dropped.
pub(crate) fn serializable_section<V: Serialize>(
    type_tag: &str,
    entries: impl IntoIterator<Item = (String, V)>,
) -> Section {
    let mut section = Section::new();
    for (key, value) in entries {
        match serde_json::to_value(&value) {
            Ok(value) => {
                section.insert(key, value);
            }
            Err(e) => {
                warn!(
                    "Unable to serialize field '{}' of {} - excluding from backup: {}",
                    key, type_tag, e
                );
            }
        }
    }
    section
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct BackupMetadataApi {
    db: Arc<dyn VolumeDb>,
    key_manager: Arc<dyn KeyManager>,
    version: u32,
}

impl BackupMetadataApi {
    pub fn new(db: Arc<dyn VolumeDb>, key_manager: Arc<dyn KeyManager>, version: u32) -> Self {
        Self {
            db,
            key_manager,
            version,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Serialized metadata container for the volume, or `None` when there is nothing
    /// to back up.
    pub async fn get(&self, volume_id: &str) -> Result<Option<String>> {
        let mut container = Section::new();
        if self.version >= 2 {
            if let Some(section) = self.save_vol_base_meta(volume_id).await? {
                container.insert(TYPE_TAG_VOL_BASE_META.to_string(), Value::Object(section));
            }
        }
        if let Some(section) = self.save_vol_meta(volume_id).await? {
            container.insert(TYPE_TAG_VOL_META.to_string(), Value::Object(section));
        }
        if let Some(section) = self.save_vol_glance_meta(volume_id).await? {
            container.insert(TYPE_TAG_VOL_GLANCE_META.to_string(), Value::Object(section));
        }

        if container.is_empty() {
            debug!("No metadata to back up for volume {}", volume_id);
            return Ok(None);
        }
        container.insert(VERSION_KEY.to_string(), Value::from(self.version));
        Ok(Some(serde_json::to_string(&container)?))
    }

    /// Restores the sections of a serialized container that its version allows.
    pub async fn put(&self, volume_id: &str, json_metadata: &str) -> Result<()> {
        let container: Section = serde_json::from_str(json_metadata)?;
        let version = container
            .get(VERSION_KEY)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                VolbackError::InvalidParameter("Metadata container has no version".to_string())
            })?;

        for (type_tag, restore) in restore_factory(version)? {
            match container.get(type_tag) {
                Some(Value::Object(section)) => match restore {
                    SectionRestore::Base(fields) => {
                        self.restore_vol_base_meta(section, volume_id, fields).await?
                    }
                    SectionRestore::Meta => self.restore_vol_meta(section, volume_id).await?,
                    SectionRestore::Glance => {
                        self.restore_vol_glance_meta(section, volume_id).await?
                    }
                },
                Some(_) => warn!("Metadata of type '{}' is not an object - skipping", type_tag),
                None => debug!("No metadata of type '{}' to restore", type_tag),
            }
        }
        Ok(())
    }

    async fn save_vol_base_meta(&self, volume_id: &str) -> Result<Option<Section>> {
        let volume = self.db.volume_get(volume_id).await?;
        let Value::Object(fields) = serde_json::to_value(&volume)? else {
            return Ok(None);
        };

        let mut entries = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let value = match (key.as_str(), value) {
                (ENCRYPTION_KEY_ID, Value::String(key_id)) => {
                    Value::String(self.key_manager.copy_key(&key_id).await?)
                }
                (_, value) => value,
            };
            entries.push((key, value));
        }

        let section = serializable_section(TYPE_TAG_VOL_BASE_META, entries);
        Ok((!section.is_empty()).then_some(section))
    }

    async fn save_vol_meta(&self, volume_id: &str) -> Result<Option<Section>> {
        let metadata = self.db.volume_metadata_get(volume_id).await?;
        if metadata.is_empty() {
            return Ok(None);
        }
        Ok(Some(serializable_section(TYPE_TAG_VOL_META, metadata)))
    }

    async fn save_vol_glance_meta(&self, volume_id: &str) -> Result<Option<Section>> {
        let metadata = match self.db.volume_glance_metadata_get(volume_id).await {
            Ok(metadata) => metadata,
            Err(VolbackError::GlanceMetadataNotFound(_)) => {
                debug!("No glance metadata found for volume {}", volume_id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(Some(serializable_section(TYPE_TAG_VOL_GLANCE_META, metadata)))
    }

    async fn restore_vol_base_meta(
        &self,
        metadata: &Section,
        volume_id: &str,
        fields: &[&str],
    ) -> Result<()> {
        let has_key = metadata
            .get(ENCRYPTION_KEY_ID)
            .is_some_and(|value| !value.is_null());
        if fields.contains(&ENCRYPTION_KEY_ID) && has_key {
            let src_type = metadata.get(VOLUME_TYPE_ID).and_then(Value::as_str);
            self.restore_vol_encryption_meta(volume_id, src_type).await?;
        }

        let mut update = VolumeUpdate::default();
        for field in fields {
            let Some(value) = metadata.get(*field) else {
                continue;
            };
            match *field {
                ENCRYPTION_KEY_ID => {
                    update.encryption_key_id = Some(value.as_str().map(str::to_string))
                }
                other => debug!("Base field '{}' is not restorable", other),
            }
        }

        if !update.is_empty() {
            self.db.volume_update(volume_id, update).await?;
        }
        Ok(())
    }

    /// An encrypted backup restores only onto a volume of the same type, or onto an
    /// untyped volume which then takes the source type.
    async fn restore_vol_encryption_meta(
        &self,
        volume_id: &str,
        src_type: Option<&str>,
    ) -> Result<()> {
        let dest = self.db.volume_get(volume_id).await?;
        if dest.volume_type_id.as_deref() == src_type {
            return Ok(());
        }
        debug!("Volume type ids do not match");

        match (dest.volume_type_id.as_deref(), src_type) {
            (None, Some(src_type)) => {
                match self.db.volume_type_get(src_type).await {
                    Ok(_) => {}
                    Err(VolbackError::VolumeTypeNotFound(_)) => {
                        debug!(
                            "Volume type of source volume has been deleted. Encrypted backup restore has failed."
                        );
                        return Err(VolbackError::EncryptedBackupFailed(format!(
                            "The source volume type '{src_type}' is not available."
                        )));
                    }
                    Err(e) => return Err(e),
                }
                debug!(
                    "The volume type of volume {} will become the source volume type {}",
                    volume_id, src_type
                );
                self.db
                    .volume_update(
                        volume_id,
                        VolumeUpdate {
                            volume_type_id: Some(src_type.to_string()),
                            ..Default::default()
                        },
                    )
                    .await
            }
            (Some(dest_type), src_type) => {
                warn!(
                    "Destination volume type is different from source volume type for an encrypted volume. Encrypted backup restore has failed."
                );
                Err(VolbackError::EncryptedBackupFailed(format!(
                    "The source volume type '{}' is different than the destination volume type '{}'.",
                    src_type.unwrap_or("None"),
                    dest_type
                )))
            }
            (None, None) => Ok(()),
        }
    }

    async fn restore_vol_meta(&self, metadata: &Section, volume_id: &str) -> Result<()> {
        let metadata = metadata
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();
        self.db
            .volume_metadata_update(volume_id, metadata, true)
            .await
    }

    /// Replaces the glance metadata and marks the volume bootable.
    async fn restore_vol_glance_meta(&self, metadata: &Section, volume_id: &str) -> Result<()> {
        self.db
            .volume_glance_metadata_delete_by_volume(volume_id)
            .await?;
        for (key, value) in metadata {
            self.db
                .volume_glance_metadata_create(volume_id, key, &value_to_string(value))
                .await?;
        }
        self.db
            .volume_update(
                volume_id,
                VolumeUpdate {
                    bootable: Some(true),
                    ..Default::default()
                },
            )
            .await
    }
}
