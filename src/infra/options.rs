//! Options store adapters: a JSON file on disk and an in-process map.

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    application::options::{OptionsError, OptionsStore},
    domain::options::OptionsSnapshot,
    util::lock::{exclusive, read_guard, write_guard},
};

const SOURCE: &str = "infra::options";

/// Options persisted as one JSON object. Writes replace the file atomically, so a
/// concurrent reader sees either the old document or the new one.
#[derive(Clone)]
pub struct FileOptionsStore {
    inner: Arc<FileInner>,
}

struct FileInner {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileOptionsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileInner {
                path: path.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn update<F>(&self, op: &'static str, apply: F) -> Result<(), OptionsError>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _guard = exclusive(&inner.write_lock, SOURCE, op);
            let mut values = read_document(&inner.path)?;
            apply(&mut values);
            write_document(&inner.path, &values)
        })
        .await
        .map_err(OptionsError::storage)?
    }
}

#[async_trait]
impl OptionsStore for FileOptionsStore {
    async fn snapshot(&self) -> Result<OptionsSnapshot, OptionsError> {
        let path = self.inner.path.clone();
        let values = tokio::task::spawn_blocking(move || read_document(&path))
            .await
            .map_err(OptionsError::storage)??;
        Ok(OptionsSnapshot::new(values))
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), OptionsError> {
        let count = entries.len();
        self.update("set_many", move |values| values.extend(entries))
            .await?;
        debug!(target = "speed_optimizer::options", count, "options written");
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), OptionsError> {
        let keys = keys.to_vec();
        self.update("remove_many", move |values| {
            for key in &keys {
                values.remove(key);
            }
        })
        .await
    }
}

fn read_document(path: &Path) -> Result<BTreeMap<String, Value>, OptionsError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(OptionsError::storage(err)),
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw)
        .map_err(|err| OptionsError::Corrupt(format!("{}: {err}", path.display())))
}

fn write_document(path: &Path, values: &BTreeMap<String, Value>) -> Result<(), OptionsError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory).map_err(OptionsError::storage)?;

    let encoded = serde_json::to_vec_pretty(values).map_err(OptionsError::storage)?;
    let mut staged = NamedTempFile::new_in(&directory).map_err(OptionsError::storage)?;
    staged.write_all(&encoded).map_err(OptionsError::storage)?;
    staged.as_file().sync_all().map_err(OptionsError::storage)?;
    staged
        .persist(path)
        .map_err(|err| OptionsError::storage(err.error))?;
    Ok(())
}

/// In-process options, used by tests and one-shot tooling.
#[derive(Clone, Default)]
pub struct MemoryOptionsStore {
    values: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryOptionsStore {
    pub fn with_values<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }
}

#[async_trait]
impl OptionsStore for MemoryOptionsStore {
    async fn snapshot(&self) -> Result<OptionsSnapshot, OptionsError> {
        let values = read_guard(&self.values, SOURCE, "snapshot").clone();
        Ok(OptionsSnapshot::new(values))
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), OptionsError> {
        write_guard(&self.values, SOURCE, "set_many").extend(entries);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), OptionsError> {
        let mut values = write_guard(&self.values, SOURCE, "remove_many");
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = FileOptionsStore::new(dir.path().join("options.json"));
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_survive_a_new_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("options.json");

        let store = FileOptionsStore::new(&path);
        store
            .set_many(vec![
                ("speed_optimizer_cdn_url".to_string(), json!("https://cdn.example")),
                ("speed_optimizer_cache_expiration".to_string(), json!(3600)),
            ])
            .await
            .unwrap();
        store
            .remove_many(&["speed_optimizer_cdn_url".to_string()])
            .await
            .unwrap();

        let reopened = FileOptionsStore::new(&path);
        let snapshot = reopened.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get("speed_optimizer_cache_expiration"),
            Some(&json!(3600))
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, "{ definitely not json").unwrap();

        let store = FileOptionsStore::new(&path);
        assert!(matches!(
            store.snapshot().await,
            Err(OptionsError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_applies_batches() {
        let store = MemoryOptionsStore::with_values([("a", json!(1)), ("b", json!(2))]);
        store
            .remove_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(store.snapshot().await.unwrap().is_empty());
    }
}
