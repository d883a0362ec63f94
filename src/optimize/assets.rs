//! Minified and concatenated copies of local stylesheets and scripts.
//!
//! Copies live under `<cache root>/{css,js,concat}/` and are named by the
//! SHA-256 of the source path and its modification time, so an edited source
//! gets a fresh copy and an unchanged one is produced once.

use std::{
    io::Write,
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::cache::CACHE_DIR_NAME;

use super::{SiteContext, minify::Minifier};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset I/O failed at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
    Bundle,
}

impl AssetKind {
    pub fn dir(self) -> &'static str {
        match self {
            AssetKind::Css => "css",
            AssetKind::Js => "js",
            AssetKind::Bundle => "concat",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::Css | AssetKind::Bundle => "css",
            AssetKind::Js => "js",
        }
    }
}

/// A local file an HTML reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub modified_nanos: u128,
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    site: SiteContext,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>, site: SiteContext) -> Self {
        Self {
            root: root.into(),
            site,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file behind `reference` when it is served from this site's document
    /// root. Remote URLs, protocol-relative URLs, traversal and missing files
    /// yield `None`.
    pub fn resolve_local(&self, reference: &str) -> Option<LocalAsset> {
        let without_query = reference
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let site_url = self.site.site_url.trim_end_matches('/');

        let relative = if !site_url.is_empty()
            && let Some(rest) = without_query.strip_prefix(site_url)
        {
            rest
        } else if without_query.starts_with('/') && !without_query.starts_with("//") {
            without_query
        } else {
            return None;
        };

        let relative = Path::new(relative.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return None;
        }

        let path = self.site.document_root.join(relative);
        let metadata = std::fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();

        Some(LocalAsset {
            path,
            modified_nanos,
        })
    }

    /// Public URL of a minified copy of `reference`, producing it if needed.
    /// `Ok(None)` when the reference is not a local file.
    pub fn minified(
        &self,
        reference: &str,
        kind: AssetKind,
        minifier: &dyn Minifier,
    ) -> Result<Option<String>, AssetError> {
        let Some(asset) = self.resolve_local(reference) else {
            return Ok(None);
        };
        let key = asset_key(std::slice::from_ref(&asset));
        let target = self.path_for(kind, &key);

        if !target.is_file() {
            let source = read_source(&asset.path)?;
            let output = match kind {
                AssetKind::Js => minifier.minify_js(&source),
                AssetKind::Css | AssetKind::Bundle => minifier.minify_css(&source),
            };
            self.write(&target, &output)?;
            debug!(
                target = "speed_optimizer::optimize::assets",
                source = %asset.path.display(),
                before = source.len(),
                after = output.len(),
                "asset minified"
            );
        }
        Ok(Some(self.public_url(kind, &key)))
    }

    /// Public URL of one stylesheet bundling every local reference in order.
    /// `Ok(None)` when fewer than two references are local.
    pub fn bundle(
        &self,
        references: &[String],
        minifier: Option<&dyn Minifier>,
    ) -> Result<Option<String>, AssetError> {
        let assets: Vec<LocalAsset> = references
            .iter()
            .filter_map(|reference| self.resolve_local(reference))
            .collect();
        if assets.len() < 2 {
            return Ok(None);
        }

        let key = asset_key(&assets);
        let target = self.path_for(AssetKind::Bundle, &key);
        if !target.is_file() {
            let mut bundle = String::new();
            for asset in &assets {
                let source = read_source(&asset.path)?;
                bundle.push_str(&format!("/* {} */\n", asset.path.display()));
                match minifier {
                    Some(minifier) => bundle.push_str(&minifier.minify_css(&source)),
                    None => bundle.push_str(&source),
                }
                bundle.push('\n');
            }
            self.write(&target, &bundle)?;
            debug!(
                target = "speed_optimizer::optimize::assets",
                files = assets.len(),
                bytes = bundle.len(),
                "stylesheets bundled"
            );
        }
        Ok(Some(self.public_url(AssetKind::Bundle, &key)))
    }

    pub fn path_for(&self, kind: AssetKind, key: &str) -> PathBuf {
        self.root
            .join(kind.dir())
            .join(format!("{key}.{}", kind.extension()))
    }

    pub fn public_url(&self, kind: AssetKind, key: &str) -> String {
        format!(
            "{}/cache/{CACHE_DIR_NAME}/{}/{key}.{}",
            self.site.content_url_path.trim_end_matches('/'),
            kind.dir(),
            kind.extension()
        )
    }

    fn write(&self, target: &Path, contents: &str) -> Result<(), AssetError> {
        let dir = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir).map_err(|err| AssetError::io(dir, err))?;
        let mut staged = NamedTempFile::new_in(dir).map_err(|err| AssetError::io(dir, err))?;
        staged
            .write_all(contents.as_bytes())
            .map_err(|err| AssetError::io(dir, err))?;
        staged
            .persist(target)
            .map_err(|err| AssetError::io(target, err.error))?;
        Ok(())
    }
}

fn read_source(path: &Path) -> Result<String, AssetError> {
    let bytes = std::fs::read(path).map_err(|err| AssetError::io(path, err))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn asset_key(assets: &[LocalAsset]) -> String {
    let mut hasher = Sha256::new();
    for asset in assets {
        hasher.update(asset.path.to_string_lossy().as_bytes());
        hasher.update(asset.modified_nanos.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}
