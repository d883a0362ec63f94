//! Capability table: which license tiers unlock which optional behaviors.
//!
//! The table records the lowest tier that unlocks each feature. The set of tiers
//! permitted for a feature is every tier at or above that minimum, so a higher tier
//! can never lose a capability a lower tier has.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{error::DomainError, tier::Tier};

/// A named optional behavior gated by license tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // Free
    BasicCaching,
    BasicMinification,
    GzipCompression,
    BasicLazyLoading,
    SimpleDatabaseCleanup,
    BasicDashboard,
    PageCaching,

    // Premium
    AdvancedCaching,
    ObjectCaching,
    FragmentCaching,
    CriticalCss,
    AdvancedMinification,
    WebpConversion,
    VideoOptimization,
    CdnIntegration,
    Prefetching,
    AdvancedAnalytics,
    PrioritySupport,
    CachePreloading,
    FileConcatenation,
    RemoveUnusedCss,
    DelayJsExecution,
    DeferJsLoading,
    DeferCssLoading,
    InlineCriticalCss,
    HeartbeatControl,
    PreloadFonts,
    CloudflareIntegration,
    VarnishCache,

    // Business
    MultisiteSupport,
    ScheduledOptimization,
    AdvancedReporting,
    AdvancedCacheRules,
    UserAgentCache,
    CacheLoggedUsers,

    // Agency
    WhiteLabeling,
    ClientManagement,
    CustomBranding,
}

/// Every feature, in table order.
const ALL_FEATURES: &[Feature] = &[
    Feature::BasicCaching,
    Feature::BasicMinification,
    Feature::GzipCompression,
    Feature::BasicLazyLoading,
    Feature::SimpleDatabaseCleanup,
    Feature::BasicDashboard,
    Feature::PageCaching,
    Feature::AdvancedCaching,
    Feature::ObjectCaching,
    Feature::FragmentCaching,
    Feature::CriticalCss,
    Feature::AdvancedMinification,
    Feature::WebpConversion,
    Feature::VideoOptimization,
    Feature::CdnIntegration,
    Feature::Prefetching,
    Feature::AdvancedAnalytics,
    Feature::PrioritySupport,
    Feature::CachePreloading,
    Feature::FileConcatenation,
    Feature::RemoveUnusedCss,
    Feature::DelayJsExecution,
    Feature::DeferJsLoading,
    Feature::DeferCssLoading,
    Feature::InlineCriticalCss,
    Feature::HeartbeatControl,
    Feature::PreloadFonts,
    Feature::CloudflareIntegration,
    Feature::VarnishCache,
    Feature::MultisiteSupport,
    Feature::ScheduledOptimization,
    Feature::AdvancedReporting,
    Feature::AdvancedCacheRules,
    Feature::UserAgentCache,
    Feature::CacheLoggedUsers,
    Feature::WhiteLabeling,
    Feature::ClientManagement,
    Feature::CustomBranding,
];

impl Feature {
    pub fn all() -> impl Iterator<Item = Feature> {
        ALL_FEATURES.iter().copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::BasicCaching => "basic_caching",
            Feature::BasicMinification => "basic_minification",
            Feature::GzipCompression => "gzip_compression",
            Feature::BasicLazyLoading => "basic_lazy_loading",
            Feature::SimpleDatabaseCleanup => "simple_database_cleanup",
            Feature::BasicDashboard => "basic_dashboard",
            Feature::PageCaching => "page_caching",
            Feature::AdvancedCaching => "advanced_caching",
            Feature::ObjectCaching => "object_caching",
            Feature::FragmentCaching => "fragment_caching",
            Feature::CriticalCss => "critical_css",
            Feature::AdvancedMinification => "advanced_minification",
            Feature::WebpConversion => "webp_conversion",
            Feature::VideoOptimization => "video_optimization",
            Feature::CdnIntegration => "cdn_integration",
            Feature::Prefetching => "prefetching",
            Feature::AdvancedAnalytics => "advanced_analytics",
            Feature::PrioritySupport => "priority_support",
            Feature::CachePreloading => "cache_preloading",
            Feature::FileConcatenation => "file_concatenation",
            Feature::RemoveUnusedCss => "remove_unused_css",
            Feature::DelayJsExecution => "delay_js_execution",
            Feature::DeferJsLoading => "defer_js_loading",
            Feature::DeferCssLoading => "defer_css_loading",
            Feature::InlineCriticalCss => "inline_critical_css",
            Feature::HeartbeatControl => "heartbeat_control",
            Feature::PreloadFonts => "preload_fonts",
            Feature::CloudflareIntegration => "cloudflare_integration",
            Feature::VarnishCache => "varnish_cache",
            Feature::MultisiteSupport => "multisite_support",
            Feature::ScheduledOptimization => "scheduled_optimization",
            Feature::AdvancedReporting => "advanced_reporting",
            Feature::AdvancedCacheRules => "advanced_cache_rules",
            Feature::UserAgentCache => "user_agent_cache",
            Feature::CacheLoggedUsers => "cache_logged_users",
            Feature::WhiteLabeling => "white_labeling",
            Feature::ClientManagement => "client_management",
            Feature::CustomBranding => "custom_branding",
        }
    }

    /// Lowest tier that unlocks this feature.
    pub fn minimum_tier(self) -> Tier {
        match self {
            Feature::BasicCaching
            | Feature::BasicMinification
            | Feature::GzipCompression
            | Feature::BasicLazyLoading
            | Feature::SimpleDatabaseCleanup
            | Feature::BasicDashboard
            | Feature::PageCaching => Tier::Free,
            Feature::AdvancedCaching
            | Feature::ObjectCaching
            | Feature::FragmentCaching
            | Feature::CriticalCss
            | Feature::AdvancedMinification
            | Feature::WebpConversion
            | Feature::VideoOptimization
            | Feature::CdnIntegration
            | Feature::Prefetching
            | Feature::AdvancedAnalytics
            | Feature::PrioritySupport
            | Feature::CachePreloading
            | Feature::FileConcatenation
            | Feature::RemoveUnusedCss
            | Feature::DelayJsExecution
            | Feature::DeferJsLoading
            | Feature::DeferCssLoading
            | Feature::InlineCriticalCss
            | Feature::HeartbeatControl
            | Feature::PreloadFonts
            | Feature::CloudflareIntegration
            | Feature::VarnishCache => Tier::Premium,
            Feature::MultisiteSupport
            | Feature::ScheduledOptimization
            | Feature::AdvancedReporting
            | Feature::AdvancedCacheRules
            | Feature::UserAgentCache
            | Feature::CacheLoggedUsers => Tier::Business,
            Feature::WhiteLabeling
            | Feature::ClientManagement
            | Feature::CustomBranding => Tier::Agency,
        }
    }

    /// The tiers permitted to use this feature, ascending.
    pub fn tiers(self) -> impl Iterator<Item = Tier> {
        self.minimum_tier().and_above()
    }

    pub fn is_available_for(self, tier: Tier) -> bool {
        tier >= self.minimum_tier()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = DomainError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Feature::all()
            .find(|feature| feature.as_str() == name)
            .ok_or_else(|| DomainError::validation(format!("unknown feature `{name}`")))
    }
}

/// Whether `tier` may use the feature called `name`. Unknown names are denied.
pub fn is_available(name: &str, tier: Tier) -> bool {
    name.parse::<Feature>()
        .map(|feature| feature.is_available_for(tier))
        .unwrap_or(false)
}

/// The tier set of the feature called `name`; empty for unknown names.
pub fn tiers_for(name: &str) -> Vec<Tier> {
    name.parse::<Feature>()
        .map(|feature| feature.tiers().collect())
        .unwrap_or_default()
}
