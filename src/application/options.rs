//! Options store contract and the settings operations built on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};
use tracing::{info, warn};

use crate::domain::{
    error::DomainError,
    license::{LICENSE_EXPIRES, LICENSE_KEY, LICENSE_STATUS},
    options::OptionsSnapshot,
    settings::{OptimizationSettings, option_key},
    tier::Tier,
};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("options storage error: {0}")]
    Storage(String),
    #[error("options document is corrupt: {0}")]
    Corrupt(String),
}

impl OptionsError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Persistent key-value options. Every multi-key call is applied as one unit.
#[async_trait]
pub trait OptionsStore: Send + Sync {
    async fn snapshot(&self) -> Result<OptionsSnapshot, OptionsError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, OptionsError> {
        Ok(self.snapshot().await?.get(key).cloned())
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), OptionsError>;

    async fn remove_many(&self, keys: &[String]) -> Result<(), OptionsError>;
}

/// Snapshot the store, treating an unreadable store as empty.
pub async fn snapshot_or_default(store: &dyn OptionsStore) -> OptionsSnapshot {
    match store.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(
                target = "speed_optimizer::options",
                error = %err,
                "options unreadable, using defaults"
            );
            OptionsSnapshot::default()
        }
    }
}

pub async fn load_settings(store: &dyn OptionsStore) -> OptimizationSettings {
    OptimizationSettings::from_snapshot(&snapshot_or_default(store).await)
}

/// Write the default for every option not yet present, license fields included.
/// Returns how many options were written.
pub async fn activate_defaults(store: &dyn OptionsStore) -> Result<usize, OptionsError> {
    let existing = store.snapshot().await?;

    let license_defaults = [
        (LICENSE_KEY, Value::String(String::new())),
        (LICENSE_STATUS, Value::String(Tier::Free.as_str().to_string())),
        (LICENSE_EXPIRES, Value::String(String::new())),
    ];

    let missing: Vec<(String, Value)> = OptimizationSettings::default_values()
        .into_iter()
        .chain(license_defaults)
        .map(|(name, value)| (option_key(name), value))
        .filter(|(key, _)| !existing.contains(key))
        .collect();

    let written = missing.len();
    if written > 0 {
        store.set_many(missing).await?;
    }

    info!(
        target = "speed_optimizer::options",
        written, "default options activated"
    );
    Ok(written)
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: String,
    timestamp: String,
    settings: Map<String, Value>,
}

/// Export every setting (stored value, or its default) as pretty JSON.
pub async fn export_settings(
    store: &dyn OptionsStore,
    now: OffsetDateTime,
) -> Result<String, OptionsError> {
    let snapshot = store.snapshot().await?;

    let settings = OptimizationSettings::default_values()
        .into_iter()
        .map(|(name, default)| {
            let value = snapshot.get(&option_key(name)).cloned().unwrap_or(default);
            (name.to_string(), value)
        })
        .collect();

    let timestamp = now
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .map_err(|err| OptionsError::Corrupt(format!("timestamp: {err}")))?;

    let envelope = SettingsEnvelope {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp,
        settings,
    };

    serde_json::to_string_pretty(&envelope).map_err(|err| OptionsError::Corrupt(err.to_string()))
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Document(#[from] DomainError),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// Import an exported document. Unknown names and non-scalar values are skipped;
/// everything else is written in a single update. Returns the number imported.
pub async fn import_settings(store: &dyn OptionsStore, json: &str) -> Result<usize, ImportError> {
    let document: Value = serde_json::from_str(json)
        .map_err(|err| DomainError::malformed_document(err.to_string()))?;

    let settings = document
        .get("settings")
        .and_then(Value::as_object)
        .ok_or_else(|| DomainError::malformed_document("missing `settings` object"))?;

    let entries: Vec<(String, Value)> = settings
        .iter()
        .filter(|(name, _)| OptimizationSettings::is_setting_name(name))
        .filter(|(_, value)| !(value.is_object() || value.is_array() || value.is_null()))
        .map(|(name, value)| (option_key(name), value.clone()))
        .collect();

    let imported = entries.len();
    if imported > 0 {
        store.set_many(entries).await?;
    }

    info!(
        target = "speed_optimizer::options",
        imported,
        skipped = settings.len() - imported,
        "settings imported"
    );
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::infra::options::MemoryOptionsStore;

    #[tokio::test]
    async fn activation_keeps_existing_values() {
        let store = MemoryOptionsStore::default();
        store
            .set_many(vec![(option_key("cache_expiration"), json!(600))])
            .await
            .unwrap();

        let written = activate_defaults(&store).await.unwrap();
        assert_eq!(written, OptimizationSettings::default_values().len() + 3 - 1);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.get(&option_key("cache_expiration")), Some(&json!(600)));
        assert_eq!(snapshot.get(&option_key(LICENSE_STATUS)), Some(&json!("free")));

        assert_eq!(activate_defaults(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn export_then_import_restores_settings() {
        let source = MemoryOptionsStore::default();
        source
            .set_many(vec![
                (option_key("cdn_url"), json!("https://cdn.example.com")),
                (option_key("enable_page_caching"), json!(0)),
            ])
            .await
            .unwrap();

        let exported = export_settings(&source, datetime!(2026-05-01 08:30:00 UTC))
            .await
            .unwrap();
        assert!(exported.contains("\"timestamp\": \"2026-05-01 08:30:00\""));

        let target = MemoryOptionsStore::default();
        let imported = import_settings(&target, &exported).await.unwrap();
        assert_eq!(imported, OptimizationSettings::default_values().len());

        let settings = load_settings(&target).await;
        assert_eq!(settings.cdn_url, "https://cdn.example.com");
        assert!(!settings.enable_page_caching);
    }

    #[tokio::test]
    async fn import_ignores_unknown_names() {
        let store = MemoryOptionsStore::default();
        let imported = import_settings(
            &store,
            r#"{"version":"1.0.0","settings":{"cdn_url":"https://c.example","license_key":"X","nonsense":1}}"#,
        )
        .await
        .unwrap();

        assert_eq!(imported, 1);
        let snapshot = store.snapshot().await.unwrap();
        assert!(!snapshot.contains(&option_key("license_key")));
    }

    #[tokio::test]
    async fn malformed_import_changes_nothing() {
        let store = MemoryOptionsStore::default();
        assert!(import_settings(&store, "{not json").await.is_err());
        assert!(import_settings(&store, r#"{"version":"1"}"#).await.is_err());
        assert!(store.snapshot().await.unwrap().is_empty());
    }
}
