//! Whole-state export and import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, SidecarError};
use crate::models::{ExtensionSettings, StorageUsage};
use crate::settings::SettingsRepository;
use crate::store::{Partition, Storage, BRIEFS_KEY, SETTINGS_KEY, SITUATIONS_KEY};

pub const EXPORT_VERSION: u32 = 1;

/// Situations and briefs are carried as raw JSON so a round trip reproduces
/// exactly what was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub situations: Value,
    pub settings: ExtensionSettings,
    pub briefs: Value,
}

#[derive(Clone)]
pub struct DataTransfer {
    storage: Storage,
    settings: SettingsRepository,
}

impl DataTransfer {
    pub fn new(storage: Storage) -> Self {
        let settings = SettingsRepository::new(storage.clone());
        Self { storage, settings }
    }

    pub async fn export(&self) -> Result<ExportDocument> {
        let situations = self
            .storage
            .load_raw(Partition::Local, SITUATIONS_KEY)
            .await?
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let briefs = self
            .storage
            .load_raw(Partition::Local, BRIEFS_KEY)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let settings = self.settings.get().await?;

        Ok(ExportDocument {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            situations,
            settings,
            briefs,
        })
    }

    pub async fn export_json(&self) -> Result<String> {
        let document = self.export().await?;
        serde_json::to_string_pretty(&document).map_err(|e| SidecarError::Validation(e.to_string()))
    }

    /// Each top-level field present (and not null) replaces its stored value
    /// wholesale; missing fields leave storage untouched. Inner structure is
    /// not validated.
    pub async fn import_json(&self, json: &str) -> Result<()> {
        let document: Value = serde_json::from_str(json).map_err(SidecarError::InvalidImport)?;
        let Value::Object(mut fields) = document else {
            return Err(SidecarError::Validation(
                "import document must be a JSON object".to_string(),
            ));
        };

        if let Some(version) = fields.get("version").and_then(Value::as_u64) {
            if version != u64::from(EXPORT_VERSION) {
                warn!(version, expected = EXPORT_VERSION, "importing document with unexpected version");
            }
        }

        let targets = [
            ("situations", Partition::Local, SITUATIONS_KEY),
            ("settings", Partition::Sync, SETTINGS_KEY),
            ("briefs", Partition::Local, BRIEFS_KEY),
        ];
        for (field, partition, key) in targets {
            match fields.remove(field) {
                None | Some(Value::Null) => continue,
                Some(value) => {
                    let _guard = self.storage.lock(partition, key).await;
                    self.storage.save_raw(partition, key, value).await?;
                    info!(field, %partition, "imported");
                }
            }
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<()> {
        let store = self.storage.store();
        store.clear(Partition::Local).await?;
        store.clear(Partition::Sync).await?;
        info!("all stored data cleared");
        Ok(())
    }

    pub async fn usage(&self) -> Result<StorageUsage> {
        let store = self.storage.store();
        let used = store.bytes_in_use(Partition::Local).await?;
        Ok(StorageUsage::new(used, store.quota(Partition::Local)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::briefs::BriefRepository;
    use crate::models::{
        CommunicationMetadata, CommunicationSource, NewCommunication, NewParticipant,
        RiskSeverity, SituationBrief, Theme,
    };
    use crate::situations::SituationRepository;
    use crate::store::MemoryStore;

    fn storage() -> Storage {
        Storage::new(Arc::new(MemoryStore::new()))
    }

    async fn populate(storage: &Storage) {
        let situations = SituationRepository::new(storage.clone());
        let first = situations.create("Vendor negotiation", "").await.unwrap();
        situations.create("Hiring", "Backend role").await.unwrap();
        situations
            .add_participant(&first.id, NewParticipant::named("Alex"))
            .await
            .unwrap();
        for content in ["one", "two", "three"] {
            situations
                .add_communication(
                    &first.id,
                    NewCommunication {
                        source: CommunicationSource::Gmail,
                        source_id: format!("thread-{content}"),
                        source_url: None,
                        timestamp: Utc::now(),
                        participants: Vec::new(),
                        content: content.to_string(),
                        metadata: CommunicationMetadata::empty_for(CommunicationSource::Gmail),
                    },
                )
                .await
                .unwrap();
        }
        BriefRepository::new(storage.clone())
            .save(SituationBrief {
                situation_id: first.id.clone(),
                generated_at: Utc::now(),
                title: first.title.clone(),
                summary: "Deadline pressure".to_string(),
                stakeholders: Vec::new(),
                unresolved_items: Vec::new(),
                suggested_next_steps: Vec::new(),
                risk_level: RiskSeverity::High,
                top_risks: Vec::new(),
            })
            .await
            .unwrap();
        let mut changes = serde_json::Map::new();
        changes.insert("theme".to_string(), json!("dark"));
        SettingsRepository::new(storage.clone())
            .update(changes)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let source = storage();
        populate(&source).await;
        let exported = DataTransfer::new(source.clone()).export_json().await.unwrap();

        let target = storage();
        let transfer = DataTransfer::new(target.clone());
        transfer.import_json(&exported).await.unwrap();

        let original = SituationRepository::new(source.clone()).list().await.unwrap();
        let restored = SituationRepository::new(target.clone()).list().await.unwrap();
        assert_eq!(original, restored);
        assert_eq!(
            BriefRepository::new(source.clone()).get_all().await.unwrap(),
            BriefRepository::new(target.clone()).get_all().await.unwrap()
        );
        let source_settings = SettingsRepository::new(source).get().await.unwrap();
        let target_settings = SettingsRepository::new(target).get().await.unwrap();
        assert_eq!(source_settings.theme, Theme::Dark);
        assert_eq!(source_settings, target_settings);
    }

    #[tokio::test]
    async fn reimporting_is_idempotent() {
        let storage = storage();
        populate(&storage).await;
        let transfer = DataTransfer::new(storage.clone());
        let exported = transfer.export_json().await.unwrap();

        transfer.import_json(&exported).await.unwrap();
        let once = transfer.export().await.unwrap();
        transfer.import_json(&exported).await.unwrap();
        let twice = transfer.export().await.unwrap();

        assert_eq!(once.situations, twice.situations);
        assert_eq!(once.briefs, twice.briefs);
        assert_eq!(once.settings, twice.settings);
    }

    #[tokio::test]
    async fn missing_fields_leave_partitions_untouched() {
        let storage = storage();
        populate(&storage).await;
        let transfer = DataTransfer::new(storage.clone());
        let before = transfer.export().await.unwrap();

        transfer
            .import_json(r#"{"situations": []}"#)
            .await
            .unwrap();
        let after = transfer.export().await.unwrap();

        assert_eq!(after.situations, json!([]));
        assert_eq!(after.briefs, before.briefs);
        assert_eq!(after.settings, before.settings);
    }

    #[tokio::test]
    async fn malformed_documents_are_rejected() {
        let transfer = DataTransfer::new(storage());
        assert!(matches!(
            transfer.import_json("{not json").await,
            Err(SidecarError::InvalidImport(_))
        ));
        assert!(matches!(
            transfer.import_json("[1, 2]").await,
            Err(SidecarError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clear_all_empties_both_partitions() {
        let storage = storage();
        populate(&storage).await;
        let transfer = DataTransfer::new(storage.clone());
        assert!(transfer.usage().await.unwrap().used > 0);

        transfer.clear_all().await.unwrap();
        let usage = transfer.usage().await.unwrap();
        assert_eq!(usage.used, 0);
        assert_eq!(usage.total, crate::store::LOCAL_QUOTA_BYTES);
        assert!(SituationRepository::new(storage.clone()).list().await.unwrap().is_empty());
        assert_eq!(
            SettingsRepository::new(storage).get().await.unwrap(),
            ExtensionSettings::default()
        );
    }
}
