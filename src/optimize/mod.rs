//! Response transforms driven by a wired [`pipeline::Pipeline`].

pub mod assets;
pub mod compress;
pub mod headers;
pub mod html;
pub mod minify;
pub mod pipeline;

use std::{path::PathBuf, sync::Arc};

use axum::http::HeaderMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use self::{
    assets::AssetCache,
    html::DocumentContext,
    minify::{Minifier, RegexMinifier},
    pipeline::{Pipeline, Stage},
};

/// Where the site lives, for telling local references from remote ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    /// Public base URL, e.g. `https://example.com`.
    pub site_url: String,
    pub document_root: PathBuf,
    /// URL path the content directory is served under, e.g. `/wp-content`.
    pub content_url_path: String,
}

impl From<&crate::config::Settings> for SiteContext {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            site_url: settings.site.site_base(),
            document_root: settings.site.document_root.clone(),
            content_url_path: settings.site.content_url_path.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Optimizer {
    site: SiteContext,
    assets: AssetCache,
    minifier: Arc<dyn Minifier>,
}

impl Optimizer {
    pub fn new(site: SiteContext, cache_root: impl Into<PathBuf>) -> Self {
        let assets = AssetCache::new(cache_root, site.clone());
        Self {
            site,
            assets,
            minifier: Arc::new(RegexMinifier),
        }
    }

    pub fn with_minifier(mut self, minifier: Arc<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }

    pub fn site(&self) -> &SiteContext {
        &self.site
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    /// Run every document stage in order. A stage that fails is skipped and
    /// the document it was given is kept.
    pub fn apply_document(&self, html: &str, pipeline: &Pipeline) -> String {
        let ctx = DocumentContext {
            site: &self.site,
            assets: &self.assets,
            minifier: self.minifier.as_ref(),
        };

        let mut current = html.to_string();
        for stage in pipeline.document_stages() {
            match html::apply(&current, stage, ctx) {
                Ok(next) => current = next,
                Err(err) => warn!(
                    target = "speed_optimizer::optimize",
                    stage = stage.name(),
                    error = %err,
                    "document stage skipped"
                ),
            }
        }
        debug!(
            target = "speed_optimizer::optimize",
            stages = pipeline.document_stages().count(),
            before = html.len(),
            after = current.len(),
            "document optimized"
        );
        current
    }

    /// Run the header stages.
    pub fn apply_headers(&self, headers: &mut HeaderMap, pipeline: &Pipeline, now: OffsetDateTime) {
        for stage in pipeline.stages() {
            if let Stage::CacheHeaders { max_age } = stage {
                headers::apply_cache_headers(headers, *max_age, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::header::CACHE_CONTROL;
    use tempfile::tempdir;

    use super::*;

    struct Shouting;

    impl Minifier for Shouting {
        fn minify_css(&self, source: &str) -> String {
            source.to_uppercase()
        }

        fn minify_js(&self, source: &str) -> String {
            source.to_uppercase()
        }
    }

    fn site(root: &std::path::Path) -> SiteContext {
        SiteContext {
            site_url: "https://example.com".into(),
            document_root: root.to_path_buf(),
            content_url_path: "/wp-content".into(),
        }
    }

    #[test]
    fn document_stages_run_in_pipeline_order() {
        let dir = tempdir().unwrap();
        let optimizer = Optimizer::new(site(dir.path()), dir.path().join("cache"));

        let mut pipeline = Pipeline::new();
        pipeline.push(Stage::CdnRewrite {
            cdn_url: "https://cdn.example.net".into(),
        });
        pipeline.push(Stage::LazyImages);
        pipeline.push(Stage::Compress);

        let out = optimizer.apply_document(
            r#"<html><body><img src="https://example.com/a.png"></body></html>"#,
            &pipeline,
        );
        assert!(out.contains(r#"src="https://cdn.example.net/a.png""#));
        assert!(out.contains(r#"loading="lazy""#));
    }

    #[test]
    fn minifier_can_be_swapped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("site.css"), "body { color: red }").unwrap();
        let optimizer = Optimizer::new(site(dir.path()), dir.path().join("cache"))
            .with_minifier(Arc::new(Shouting));

        let mut pipeline = Pipeline::new();
        pipeline.push(Stage::MinifyAssets {
            css: true,
            js: false,
            exclude: Vec::new(),
        });
        let out =
            optimizer.apply_document(r#"<link rel="stylesheet" href="/site.css">"#, &pipeline);
        let key = out
            .split("/css/")
            .nth(1)
            .and_then(|rest| rest.split(".css").next())
            .unwrap();
        let copy = optimizer.assets().path_for(assets::AssetKind::Css, key);
        assert_eq!(std::fs::read_to_string(copy).unwrap(), "BODY { COLOR: RED }");
    }

    #[test]
    fn header_stages_only_touch_headers() {
        let dir = tempdir().unwrap();
        let optimizer = Optimizer::new(site(dir.path()), dir.path().join("cache"));
        let mut pipeline = Pipeline::new();
        pipeline.push(Stage::CacheHeaders { max_age: 60 });

        let html = "<html><body></body></html>";
        assert_eq!(optimizer.apply_document(html, &pipeline), html);

        let mut headers = HeaderMap::new();
        optimizer.apply_headers(&mut headers, &pipeline, OffsetDateTime::now_utc());
        assert_eq!(headers[CACHE_CONTROL], "public, max-age=60");
    }
}
