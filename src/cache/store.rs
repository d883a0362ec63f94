//! File-backed page store: one `<key>.html` file per cache entry.

use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store I/O failed at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache store task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A page as it sits on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPage {
    pub content: String,
    pub modified: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.html", key.as_str()))
    }

    /// `Ok(None)` when nothing has been stored under `key`.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<StoredPage>, StoreError> {
        let path = self.path_for(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        let modified = metadata
            .modified()
            .map_err(|err| StoreError::io(&path, err))?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            // Purged between the stat and the read.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        Ok(Some(StoredPage {
            content,
            modified: OffsetDateTime::from(modified),
        }))
    }

    /// Replace whatever is stored under `key`. Readers see the old file or the
    /// new one, never a partial write.
    pub async fn write(&self, key: &CacheKey, content: &str) -> Result<(), StoreError> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let content = content.as_bytes().to_vec();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
            let mut staged =
                NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
            staged
                .write_all(&content)
                .map_err(|err| StoreError::io(&dir, err))?;
            staged
                .persist(&path)
                .map_err(|err| StoreError::io(&path, err.error))?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || count_entries(&dir))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

/// Recursively delete `dir`; a directory that is already gone is not an error.
pub(crate) async fn remove_tree(dir: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(dir, err)),
    }
}

fn count_entries(dir: &Path) -> Result<StoreStats, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreStats::default()),
        Err(err) => return Err(StoreError::io(dir, err)),
    };

    let mut stats = StoreStats::default();
    for entry in entries {
        let entry = entry.map_err(|err| StoreError::io(dir, err))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
            continue;
        }
        let metadata = entry.metadata().map_err(|err| StoreError::io(&path, err))?;
        if metadata.is_file() {
            stats.entries += 1;
            stats.bytes += metadata.len();
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{cache::keys::KeyOptions, domain::request::PageRequest};

    use super::*;

    fn key(path: &str) -> CacheKey {
        CacheKey::derive(&PageRequest::get(path), &KeyOptions::default())
    }

    #[tokio::test]
    async fn unknown_key_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = PageStore::new(dir.path().join("pages"));
        assert!(store.read(&key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_returns_content() {
        let dir = tempdir().unwrap();
        let store = PageStore::new(dir.path().join("pages"));
        let key = key("/about");

        store.write(&key, "<html>first</html>").await.unwrap();
        store.write(&key, "<html>second</html>").await.unwrap();

        let page = store.read(&key).await.unwrap().unwrap();
        assert_eq!(page.content, "<html>second</html>");
        assert!(store.path_for(&key).ends_with(format!("{key}.html")));
    }

    #[tokio::test]
    async fn stats_survive_tree_removal() {
        let dir = tempdir().unwrap();
        let pages = dir.path().join("pages");
        let store = PageStore::new(&pages);
        store.write(&key("/a"), "aaaa").await.unwrap();
        store.write(&key("/b"), "bb").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats { entries: 2, bytes: 6 });

        remove_tree(&pages).await.unwrap();
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
        remove_tree(&pages).await.unwrap();
    }
}
