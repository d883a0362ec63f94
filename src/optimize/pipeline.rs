//! The ordered list of transform stages assembled for one request.

use std::fmt;

use serde::Serialize;

/// Points in a response's life where stages run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePoint {
    BeforeHeaders,
    AssetEnqueue,
    HeadEnd,
    ScriptTag,
    AttachmentUrl,
    BodyEnd,
    Transport,
}

impl LifecyclePoint {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePoint::BeforeHeaders => "before_headers",
            LifecyclePoint::AssetEnqueue => "asset_enqueue",
            LifecyclePoint::HeadEnd => "head_end",
            LifecyclePoint::ScriptTag => "script_tag",
            LifecyclePoint::AttachmentUrl => "attachment_url",
            LifecyclePoint::BodyEnd => "body_end",
            LifecyclePoint::Transport => "transport",
        }
    }

    /// Whether stages at this point rewrite the HTML document.
    pub fn mutates_document(self) -> bool {
        !matches!(
            self,
            LifecyclePoint::BeforeHeaders | LifecyclePoint::Transport
        )
    }
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// `Cache-Control` and `Expires` for browsers.
    CacheHeaders { max_age: u64 },
    /// Point local stylesheet/script references at minified copies.
    MinifyAssets {
        css: bool,
        js: bool,
        exclude: Vec<String>,
    },
    /// Merge local stylesheets into one bundle.
    ConcatenateStyles { exclude: Vec<String> },
    /// Preconnect and DNS-prefetch hints in the head.
    PerformanceHints { preconnect: Vec<String> },
    /// Async for analytics, defer for jQuery and embeds.
    ScriptLoading,
    /// Defer every remaining external script.
    DeferScripts { exclude: Vec<String> },
    /// Native lazy-loading attributes on images.
    LazyImages,
    /// Swap raster images for existing WebP siblings.
    WebpImages,
    /// Serve site-hosted media from the CDN.
    CdnRewrite { cdn_url: String },
    /// Observer script for `data-src` images.
    LazyLoadScript,
    /// Heartbeat polling interval.
    HeartbeatSettings { interval_secs: u64 },
    /// Gzip the final body.
    Compress,
}

impl Stage {
    pub fn point(&self) -> LifecyclePoint {
        match self {
            Stage::CacheHeaders { .. } => LifecyclePoint::BeforeHeaders,
            Stage::MinifyAssets { .. } | Stage::ConcatenateStyles { .. } => {
                LifecyclePoint::AssetEnqueue
            }
            Stage::PerformanceHints { .. } | Stage::HeartbeatSettings { .. } => {
                LifecyclePoint::HeadEnd
            }
            Stage::ScriptLoading | Stage::DeferScripts { .. } => LifecyclePoint::ScriptTag,
            Stage::LazyImages | Stage::WebpImages | Stage::CdnRewrite { .. } => {
                LifecyclePoint::AttachmentUrl
            }
            Stage::LazyLoadScript => LifecyclePoint::BodyEnd,
            Stage::Compress => LifecyclePoint::Transport,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::CacheHeaders { .. } => "cache_headers",
            Stage::MinifyAssets { .. } => "minify_assets",
            Stage::ConcatenateStyles { .. } => "concatenate_styles",
            Stage::PerformanceHints { .. } => "performance_hints",
            Stage::ScriptLoading => "script_loading",
            Stage::DeferScripts { .. } => "defer_scripts",
            Stage::LazyImages => "lazy_images",
            Stage::WebpImages => "webp_images",
            Stage::CdnRewrite { .. } => "cdn_rewrite",
            Stage::LazyLoadScript => "lazy_load_script",
            Stage::HeartbeatSettings { .. } => "heartbeat_settings",
            Stage::Compress => "compress",
        }
    }
}

/// Stages ordered by lifecycle point, then by the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        let point = stage.point();
        let at = self
            .stages
            .iter()
            .position(|existing| existing.point() > point)
            .unwrap_or(self.stages.len());
        self.stages.insert(at, stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn at(&self, point: LifecyclePoint) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |stage| stage.point() == point)
    }

    /// Stages that rewrite the document, in execution order.
    pub fn document_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.point().mutates_document())
    }

    pub fn has_document_stages(&self) -> bool {
        self.document_stages().next().is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|stage| stage.name() == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
