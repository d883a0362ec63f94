//! Feature wiring: decides, once per request, which optional behaviors run and
//! assembles their stages into one ordered pipeline.

use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;

use crate::{
    cache::CacheRules,
    domain::{
        features::Feature,
        request::PageRequest,
        settings::{OptimizationLevel, OptimizationSettings},
        tier::Tier,
    },
    optimize::pipeline::{Pipeline, Stage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    PageCache,
    BrowserCacheHeaders,
    Compression,
    Minification,
    LazyLoading,
    CdnRewrite,
    WebpRewrite,
    FileConcatenation,
    DeferJs,
    HeartbeatControl,
    CachePreloading,
    PerformanceHints,
    ScriptLoading,
}

const ALL_BEHAVIORS: &[Behavior] = &[
    Behavior::PageCache,
    Behavior::BrowserCacheHeaders,
    Behavior::Compression,
    Behavior::Minification,
    Behavior::LazyLoading,
    Behavior::CdnRewrite,
    Behavior::WebpRewrite,
    Behavior::FileConcatenation,
    Behavior::DeferJs,
    Behavior::HeartbeatControl,
    Behavior::CachePreloading,
    Behavior::PerformanceHints,
    Behavior::ScriptLoading,
];

impl Behavior {
    pub fn all() -> impl Iterator<Item = Behavior> {
        ALL_BEHAVIORS.iter().copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::PageCache => "page_cache",
            Behavior::BrowserCacheHeaders => "browser_cache_headers",
            Behavior::Compression => "compression",
            Behavior::Minification => "minification",
            Behavior::LazyLoading => "lazy_loading",
            Behavior::CdnRewrite => "cdn_rewrite",
            Behavior::WebpRewrite => "webp_rewrite",
            Behavior::FileConcatenation => "file_concatenation",
            Behavior::DeferJs => "defer_js",
            Behavior::HeartbeatControl => "heartbeat_control",
            Behavior::CachePreloading => "cache_preloading",
            Behavior::PerformanceHints => "performance_hints",
            Behavior::ScriptLoading => "script_loading",
        }
    }

    /// `None` for behaviors every tier gets.
    pub fn required_feature(self) -> Option<Feature> {
        match self {
            Behavior::PageCache => Some(Feature::PageCaching),
            Behavior::BrowserCacheHeaders => Some(Feature::BasicCaching),
            Behavior::Compression => Some(Feature::GzipCompression),
            Behavior::Minification => Some(Feature::BasicMinification),
            Behavior::LazyLoading => Some(Feature::BasicLazyLoading),
            Behavior::CdnRewrite => Some(Feature::CdnIntegration),
            Behavior::WebpRewrite => Some(Feature::WebpConversion),
            Behavior::FileConcatenation => Some(Feature::FileConcatenation),
            Behavior::DeferJs => Some(Feature::DeferJsLoading),
            Behavior::HeartbeatControl => Some(Feature::HeartbeatControl),
            Behavior::CachePreloading => Some(Feature::CachePreloading),
            Behavior::PerformanceHints | Behavior::ScriptLoading => None,
        }
    }

    /// Whether the settings ask for this behavior.
    pub fn is_enabled_in(self, settings: &OptimizationSettings) -> bool {
        match self {
            Behavior::PageCache => settings.enable_page_caching,
            Behavior::BrowserCacheHeaders => settings.enable_caching,
            Behavior::Compression => settings.enable_compression,
            Behavior::Minification => {
                settings.enable_minification
                    && settings.optimization_level != OptimizationLevel::None
            }
            Behavior::LazyLoading => settings.enable_image_optimization,
            Behavior::CdnRewrite => !settings.cdn_url.is_empty(),
            Behavior::WebpRewrite => settings.webp_conversion,
            Behavior::FileConcatenation => settings.enable_concatenation,
            Behavior::DeferJs => settings.defer_js_loading,
            Behavior::HeartbeatControl => settings.heartbeat_control,
            Behavior::CachePreloading => settings.enable_cache_preloading,
            Behavior::PerformanceHints | Behavior::ScriptLoading => true,
        }
    }

    pub fn is_unlocked_for(self, tier: Tier) -> bool {
        self.required_feature()
            .is_none_or(|feature| feature.is_available_for(tier))
    }

    /// Stages this behavior contributes, in declaration order.
    fn stages(self, settings: &OptimizationSettings) -> Vec<Stage> {
        match self {
            Behavior::PageCache | Behavior::CachePreloading => Vec::new(),
            Behavior::BrowserCacheHeaders => vec![Stage::CacheHeaders {
                max_age: settings.cache_expiration,
            }],
            Behavior::Compression => vec![Stage::Compress],
            Behavior::Minification => vec![Stage::MinifyAssets {
                css: settings.optimization_level.minifies_css(),
                js: settings.optimization_level.minifies_js(),
                exclude: settings.exclude_files.clone(),
            }],
            Behavior::LazyLoading => vec![Stage::LazyImages, Stage::LazyLoadScript],
            Behavior::CdnRewrite => vec![Stage::CdnRewrite {
                cdn_url: settings.cdn_url.clone(),
            }],
            Behavior::WebpRewrite => vec![Stage::WebpImages],
            Behavior::FileConcatenation => vec![Stage::ConcatenateStyles {
                exclude: settings.exclude_files.clone(),
            }],
            Behavior::DeferJs => vec![Stage::DeferScripts {
                exclude: settings.exclude_files.clone(),
            }],
            Behavior::HeartbeatControl => vec![Stage::HeartbeatSettings {
                interval_secs: settings.heartbeat_frequency,
            }],
            Behavior::PerformanceHints => vec![Stage::PerformanceHints {
                preconnect: settings.preconnect_domains.clone(),
            }],
            Behavior::ScriptLoading => vec![Stage::ScriptLoading],
        }
    }
}

/// Declaration order used when filling the pipeline. Within one lifecycle
/// point stages keep this order, so WebP rewriting sees site URLs before the
/// CDN rewrite moves them off-site.
const DECLARATION_ORDER: &[Behavior] = &[
    Behavior::BrowserCacheHeaders,
    Behavior::FileConcatenation,
    Behavior::Minification,
    Behavior::PerformanceHints,
    Behavior::HeartbeatControl,
    Behavior::ScriptLoading,
    Behavior::DeferJs,
    Behavior::LazyLoading,
    Behavior::WebpRewrite,
    Behavior::CdnRewrite,
    Behavior::Compression,
    Behavior::PageCache,
    Behavior::CachePreloading,
];

/// The outcome of wiring one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wiring {
    pub tier: Tier,
    pub behaviors: BTreeSet<Behavior>,
    pub pipeline: Pipeline,
    /// Present iff the page cache is wired.
    #[serde(skip)]
    pub cache_rules: Option<CacheRules>,
}

impl Wiring {
    pub fn is_active(&self, behavior: Behavior) -> bool {
        self.behaviors.contains(&behavior)
    }
}

/// What one HTTP request is served with: its neutral model and the wiring
/// computed for it. Attached as a request extension.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub request: PageRequest,
    pub wiring: Arc<Wiring>,
}

/// Activate each behavior iff its settings flag is on and its feature is
/// unlocked for `tier`.
pub fn wire(settings: &OptimizationSettings, tier: Tier) -> Wiring {
    let behaviors: BTreeSet<Behavior> = Behavior::all()
        .filter(|behavior| behavior.is_enabled_in(settings) && behavior.is_unlocked_for(tier))
        .collect();

    let mut pipeline = Pipeline::new();
    for behavior in DECLARATION_ORDER {
        if behaviors.contains(behavior) {
            for stage in behavior.stages(settings) {
                pipeline.push(stage);
            }
        }
    }

    let cache_rules = behaviors
        .contains(&Behavior::PageCache)
        .then(|| CacheRules::from_settings(settings, tier));

    Wiring {
        tier,
        behaviors,
        pipeline,
        cache_rules,
    }
}
