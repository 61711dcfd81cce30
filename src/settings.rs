use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{Result, SidecarError};
use crate::models::ExtensionSettings;
use crate::store::{Partition, Storage, SETTINGS_KEY};

/// Single settings record in the synced partition, always read merged over
/// the defaults so fields added later need no migration.
#[derive(Clone)]
pub struct SettingsRepository {
    storage: Storage,
}

impl SettingsRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn get(&self) -> Result<ExtensionSettings> {
        let stored = self.storage.load_raw(Partition::Sync, SETTINGS_KEY).await?;
        let (settings, _ignored) = resolve(stored)?;
        Ok(settings)
    }

    pub async fn update(&self, changes: Map<String, Value>) -> Result<ExtensionSettings> {
        let _guard = self.storage.lock(Partition::Sync, SETTINGS_KEY).await;
        let current = self.get().await?;
        let mut merged = to_object(&current)?;
        merge(&mut merged, Value::Object(changes));

        let updated: ExtensionSettings = serde_json::from_value(merged)
            .map_err(|e| SidecarError::Validation(format!("invalid settings: {e}")))?;
        self.storage
            .save(Partition::Sync, SETTINGS_KEY, &updated)
            .await?;
        info!(
            model = %updated.local_llm_model,
            endpoint = %updated.local_llm_endpoint,
            "settings updated"
        );
        Ok(updated)
    }
}

/// Stored fields win. A stored field that no longer fits the record (wrong
/// type, retired enum value) falls back to its default on its own; the names
/// of ignored fields are returned alongside the settings.
fn resolve(stored: Option<Value>) -> Result<(ExtensionSettings, Vec<String>)> {
    let mut merged = to_object(&ExtensionSettings::default())?;
    let mut ignored = Vec::new();
    match stored {
        None => {}
        Some(Value::Object(stored)) => {
            for (key, value) in stored {
                let mut candidate = merged.clone();
                let mut field = Map::new();
                field.insert(key.clone(), value);
                merge(&mut candidate, Value::Object(field));
                if serde_json::from_value::<ExtensionSettings>(candidate.clone()).is_ok() {
                    merged = candidate;
                } else {
                    warn!(field = %key, "stored setting ignored");
                    ignored.push(key);
                }
            }
        }
        Some(other) => {
            warn!(value = %other, "stored settings record is not an object; using defaults");
            ignored.push(SETTINGS_KEY.to_string());
        }
    }
    let settings =
        serde_json::from_value(merged).map_err(|e| SidecarError::Validation(e.to_string()))?;
    Ok((settings, ignored))
}

fn to_object(settings: &ExtensionSettings) -> Result<Value> {
    serde_json::to_value(settings).map_err(|e| SidecarError::Validation(e.to_string()))
}

/// Recursive object merge: keys in `overlay` replace those in `base`,
/// nested objects are merged key by key.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let nested = value.is_object() && base.get(&key).is_some_and(Value::is_object);
                if !nested {
                    base.insert(key, value);
                } else if let Some(existing) = base.get_mut(&key) {
                    merge(existing, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::models::Theme;
    use crate::store::MemoryStore;

    fn repository() -> SettingsRepository {
        SettingsRepository::new(Storage::new(Arc::new(MemoryStore::new())))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn empty_store_yields_defaults() {
        let settings = repository().get().await.unwrap();
        assert_eq!(settings, ExtensionSettings::default());
        assert_eq!(settings.local_llm_endpoint, "http://localhost:11434");
        assert_eq!(settings.local_llm_model, "llama3:8b");
    }

    #[tokio::test]
    async fn update_overrides_only_supplied_fields() {
        let repo = repository();
        repo.update(object(json!({"theme": "dark"}))).await.unwrap();

        let settings = repo.get().await.unwrap();
        assert_eq!(
            settings,
            ExtensionSettings {
                theme: Theme::Dark,
                ..ExtensionSettings::default()
            }
        );
    }

    #[tokio::test]
    async fn invalid_update_is_rejected_before_writing() {
        let repo = repository();
        let err = repo
            .update(object(json!({"theme": "purple"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SidecarError::Validation(_)));
        assert_eq!(repo.get().await.unwrap().theme, Theme::System);
    }

    #[tokio::test]
    async fn partial_stored_record_is_filled_from_defaults() {
        let store = Arc::new(MemoryStore::new());
        let storage = Storage::new(store);
        storage
            .save_raw(Partition::Sync, SETTINGS_KEY, json!({"localLlmModel": "mistral"}))
            .await
            .unwrap();

        let settings = SettingsRepository::new(storage).get().await.unwrap();
        assert_eq!(settings.local_llm_model, "mistral");
        assert!(settings.capture_slack);
    }

    #[test]
    fn badly_typed_stored_field_falls_back_to_default() {
        let (settings, ignored) =
            resolve(Some(json!({"autoCapture": "yes", "theme": "light"}))).unwrap();
        assert!(!settings.auto_capture);
        assert_eq!(settings.theme, Theme::Light);
        assert_eq!(ignored, vec!["autoCapture".to_string()]);
    }

    #[test]
    fn non_object_record_is_reported_and_replaced_by_defaults() {
        let (settings, ignored) = resolve(Some(json!("dark"))).unwrap();
        assert_eq!(settings, ExtensionSettings::default());
        assert_eq!(ignored, vec![SETTINGS_KEY.to_string()]);

        let (_, ignored) = resolve(None).unwrap();
        assert!(ignored.is_empty());
    }

    #[test]
    fn merge_is_recursive() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        merge(&mut base, json!({"a": {"y": 3}, "c": 4}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 1, "c": 4}));
    }
}
