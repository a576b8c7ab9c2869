use crate::BackupMetadataApi;
use crate::metadata::{
    TYPE_TAG_VOL_BASE_META, TYPE_TAG_VOL_GLANCE_META, TYPE_TAG_VOL_META, serializable_section,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use volback_core::{
    LocalKeyManager, Result, StateDb, VolbackError, VolumeDb, VolumeRecord, VolumeType,
    VolumeUpdate,
};

struct Fixture {
    db: Arc<StateDb>,
    keys: Arc<LocalKeyManager>,
}

impl Fixture {
    async fn new() -> Result<Self> {
        let db = Arc::new(StateDb::new());
        db.volume_type_create(VolumeType {
            id: "luks".to_string(),
            name: "encrypted".to_string(),
            encrypted: true,
        })
        .await?;
        db.volume_type_create(VolumeType {
            id: "plain".to_string(),
            name: "plain".to_string(),
            encrypted: false,
        })
        .await?;

        Ok(Self {
            db,
            keys: Arc::new(LocalKeyManager::new()),
        })
    }

    fn api(&self, version: u32) -> BackupMetadataApi {
        BackupMetadataApi::new(self.db.clone(), self.keys.clone(), version)
    }

    /// Encrypted, image-backed volume carrying user metadata.
    async fn source_volume(&self, id: &str) -> Result<String> {
        let key_id = self.keys.store("secret").await?;
        let mut volume = VolumeRecord::new(id, 1);
        volume.display_name = Some("source".to_string());
        volume.volume_type_id = Some("luks".to_string());
        volume.encryption_key_id = Some(key_id.clone());
        self.db.volume_create(volume).await?;

        self.db
            .volume_metadata_update(id, pairs(&[("owner", "ops"), ("tier", "gold")]), false)
            .await?;
        self.db
            .volume_glance_metadata_create(id, "image_id", "img-1")
            .await?;
        self.db
            .volume_glance_metadata_create(id, "min_disk", "1")
            .await?;
        Ok(key_id)
    }
}

fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_unserializable_entries_are_dropped() {
    let mut bad = HashMap::new();
    bad.insert((1u8, 2u8), 3u8);

    let good = serializable_section(
        TYPE_TAG_VOL_META,
        vec![("fine".to_string(), serde_json::json!("value"))],
    );
    assert_eq!(good.len(), 1);

    let section = serializable_section(TYPE_TAG_VOL_META, vec![("bad".to_string(), bad)]);
    assert!(section.is_empty());
}

#[tokio::test]
async fn test_v2_container_sections() -> Result<()> {
    let fixture = Fixture::new().await?;
    let key_id = fixture.source_volume("src").await?;

    let json = fixture.api(2).get("src").await?.expect("metadata present");
    let container: Value = serde_json::from_str(&json)?;

    assert_eq!(container["version"], 2);
    assert_eq!(container[TYPE_TAG_VOL_META]["tier"], "gold");
    assert_eq!(container[TYPE_TAG_VOL_GLANCE_META]["image_id"], "img-1");
    assert_eq!(container[TYPE_TAG_VOL_BASE_META]["display_name"], "source");

    // The backup owns a copy of the key, not the volume's key.
    let copied = container[TYPE_TAG_VOL_BASE_META]["encryption_key_id"]
        .as_str()
        .expect("key id")
        .to_string();
    assert_ne!(copied, key_id);
    assert_eq!(fixture.keys.get(&copied).await?, "secret");
    Ok(())
}

#[tokio::test]
async fn test_v1_container_without_metadata_is_none() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.db.volume_create(VolumeRecord::new("bare", 1)).await?;

    assert_eq!(fixture.api(1).get("bare").await?, None);

    let json = fixture.api(2).get("bare").await?.expect("base fields");
    let container: Value = serde_json::from_str(&json)?;
    assert!(container.get(TYPE_TAG_VOL_GLANCE_META).is_none());
    assert!(container.get(TYPE_TAG_VOL_META).is_none());
    Ok(())
}

#[tokio::test]
async fn test_v2_round_trip_restores_allowlisted_fields() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.source_volume("src").await?;
    let api = fixture.api(2);
    let json = api.get("src").await?.expect("metadata present");

    let mut dest = VolumeRecord::new("dest", 1);
    dest.display_name = Some("dest".to_string());
    fixture.db.volume_create(dest).await?;
    fixture
        .db
        .volume_glance_metadata_create("dest", "stale", "yes")
        .await?;

    api.put("dest", &json).await?;

    let restored = fixture.db.volume_get("dest").await?;
    let container: Value = serde_json::from_str(&json)?;
    assert_eq!(
        restored.encryption_key_id.as_deref(),
        container[TYPE_TAG_VOL_BASE_META]["encryption_key_id"].as_str()
    );
    assert_eq!(restored.volume_type_id.as_deref(), Some("luks"));
    assert_eq!(restored.display_name.as_deref(), Some("dest"));
    assert!(restored.bootable);

    assert_eq!(
        fixture.db.volume_metadata_get("dest").await?,
        pairs(&[("owner", "ops"), ("tier", "gold")])
    );
    assert_eq!(
        fixture.db.volume_glance_metadata_get("dest").await?,
        pairs(&[("image_id", "img-1"), ("min_disk", "1")])
    );
    Ok(())
}

#[tokio::test]
async fn test_v1_restore_ignores_base_fields() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.db.volume_create(VolumeRecord::new("dest", 1)).await?;

    let json = serde_json::json!({
        "version": 1,
        TYPE_TAG_VOL_BASE_META: { "encryption_key_id": "k1", "volume_type_id": "luks" },
        TYPE_TAG_VOL_META: { "a": "1", "n": 5 },
    })
    .to_string();
    fixture.api(2).put("dest", &json).await?;

    let restored = fixture.db.volume_get("dest").await?;
    assert_eq!(restored.encryption_key_id, None);
    assert_eq!(restored.volume_type_id, None);
    assert!(!restored.bootable);
    assert_eq!(
        fixture.db.volume_metadata_get("dest").await?,
        pairs(&[("a", "1"), ("n", "5")])
    );
    Ok(())
}

#[tokio::test]
async fn test_unsupported_version() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.db.volume_create(VolumeRecord::new("dest", 1)).await?;

    let result = fixture.api(2).put("dest", r#"{"version": 3}"#).await;
    assert!(matches!(
        result,
        Err(VolbackError::UnsupportedMetadataVersion(3))
    ));
    Ok(())
}

#[tokio::test]
async fn test_encrypted_restore_requires_matching_type() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.source_volume("src").await?;
    let api = fixture.api(2);
    let json = api.get("src").await?.expect("metadata present");

    let mut dest = VolumeRecord::new("dest", 1);
    dest.volume_type_id = Some("plain".to_string());
    fixture.db.volume_create(dest).await?;

    let result = api.put("dest", &json).await;
    assert!(matches!(result, Err(VolbackError::EncryptedBackupFailed(_))));
    assert_eq!(fixture.db.volume_get("dest").await?.encryption_key_id, None);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_restore_fails_when_source_type_deleted() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.source_volume("src").await?;
    let api = fixture.api(2);
    let json = api.get("src").await?.expect("metadata present");

    fixture.db.volume_type_destroy("luks").await?;
    fixture.db.volume_create(VolumeRecord::new("dest", 1)).await?;

    let result = api.put("dest", &json).await;
    assert!(matches!(result, Err(VolbackError::EncryptedBackupFailed(_))));
    Ok(())
}

#[tokio::test]
async fn test_matching_type_keeps_destination_type() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.source_volume("src").await?;
    let api = fixture.api(2);
    let json = api.get("src").await?.expect("metadata present");

    let mut dest = VolumeRecord::new("dest", 1);
    dest.volume_type_id = Some("luks".to_string());
    fixture.db.volume_create(dest).await?;
    fixture
        .db
        .volume_update(
            "dest",
            VolumeUpdate {
                display_name: Some("kept".to_string()),
                ..Default::default()
            },
        )
        .await?;

    api.put("dest", &json).await?;
    let restored = fixture.db.volume_get("dest").await?;
    assert_eq!(restored.volume_type_id.as_deref(), Some("luks"));
    assert_eq!(restored.display_name.as_deref(), Some("kept"));
    assert!(restored.encryption_key_id.is_some());
    Ok(())
}
