//! Optimization settings: the flat record read at the start of every request.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    error::DomainError,
    options::{OptionsSnapshot, split_list},
};

/// Prefix shared by every persisted option.
pub const OPTION_PREFIX: &str = "speed_optimizer_";

/// Setting names, without the option prefix.
pub mod names {
    pub const ENABLE_CACHING: &str = "enable_caching";
    pub const ENABLE_MINIFICATION: &str = "enable_minification";
    pub const ENABLE_COMPRESSION: &str = "enable_compression";
    pub const ENABLE_IMAGE_OPTIMIZATION: &str = "enable_image_optimization";
    pub const OPTIMIZATION_LEVEL: &str = "optimization_level";
    pub const CDN_URL: &str = "cdn_url";
    pub const EXCLUDE_FILES: &str = "exclude_files";
    pub const CACHE_EXPIRATION: &str = "cache_expiration";
    pub const ENABLE_PAGE_CACHING: &str = "enable_page_caching";
    pub const ENABLE_CACHE_PRELOADING: &str = "enable_cache_preloading";
    pub const ENABLE_MOBILE_CACHE: &str = "enable_mobile_cache";
    pub const CACHE_LOGGED_USERS: &str = "cache_logged_users";
    pub const CACHE_QUERY_STRINGS: &str = "cache_query_strings";
    pub const USER_AGENT_CACHE: &str = "user_agent_cache";
    pub const ENABLE_CONCATENATION: &str = "enable_concatenation";
    pub const DEFER_JS_LOADING: &str = "defer_js_loading";
    pub const WEBP_CONVERSION: &str = "webp_conversion";
    pub const EXCLUDE_CART_CHECKOUT: &str = "exclude_cart_checkout";
    pub const HEARTBEAT_CONTROL: &str = "heartbeat_control";
    pub const HEARTBEAT_FREQUENCY: &str = "heartbeat_frequency";
    pub const PRECONNECT_DOMAINS: &str = "preconnect_domains";
    pub const BYPASS_COOKIES: &str = "bypass_cookies";
    pub const CACHE_EXCLUDE_PATHS: &str = "cache_exclude_paths";
}

/// Full option key for a setting name.
pub fn option_key(name: &str) -> String {
    format!("{OPTION_PREFIX}{name}")
}

/// How hard asset minification works.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    None,
    #[default]
    Moderate,
    Aggressive,
}

impl OptimizationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationLevel::None => "none",
            OptimizationLevel::Moderate => "moderate",
            OptimizationLevel::Aggressive => "aggressive",
        }
    }

    pub fn minifies_css(self) -> bool {
        self != OptimizationLevel::None
    }

    pub fn minifies_js(self) -> bool {
        self == OptimizationLevel::Aggressive
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationLevel {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(OptimizationLevel::None),
            "moderate" => Ok(OptimizationLevel::Moderate),
            "aggressive" => Ok(OptimizationLevel::Aggressive),
            other => Err(DomainError::validation(format!(
                "unknown optimization level `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationSettings {
    pub enable_caching: bool,
    pub enable_minification: bool,
    pub enable_compression: bool,
    pub enable_image_optimization: bool,
    pub optimization_level: OptimizationLevel,
    pub cdn_url: String,
    pub exclude_files: Vec<String>,
    pub cache_expiration: u64,
    pub enable_page_caching: bool,
    pub enable_cache_preloading: bool,
    pub enable_mobile_cache: bool,
    pub cache_logged_users: bool,
    pub cache_query_strings: bool,
    pub user_agent_cache: bool,
    pub enable_concatenation: bool,
    pub defer_js_loading: bool,
    pub webp_conversion: bool,
    pub exclude_cart_checkout: bool,
    pub heartbeat_control: bool,
    pub heartbeat_frequency: u64,
    pub preconnect_domains: Vec<String>,
    pub bypass_cookies: Vec<String>,
    pub cache_exclude_paths: Vec<String>,
}

pub const DEFAULT_CACHE_EXPIRATION_SECS: u64 = 86_400;
pub const DEFAULT_HEARTBEAT_FREQUENCY_SECS: u64 = 60;

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_minification: true,
            enable_compression: true,
            enable_image_optimization: true,
            optimization_level: OptimizationLevel::Moderate,
            cdn_url: String::new(),
            exclude_files: Vec::new(),
            cache_expiration: DEFAULT_CACHE_EXPIRATION_SECS,
            enable_page_caching: true,
            enable_cache_preloading: false,
            enable_mobile_cache: true,
            cache_logged_users: false,
            cache_query_strings: false,
            user_agent_cache: false,
            enable_concatenation: false,
            defer_js_loading: false,
            webp_conversion: false,
            exclude_cart_checkout: true,
            heartbeat_control: false,
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY_SECS,
            preconnect_domains: Vec::new(),
            bypass_cookies: Vec::new(),
            cache_exclude_paths: Vec::new(),
        }
    }
}

impl OptimizationSettings {
    /// Build the record from an options snapshot. Missing or unreadable values
    /// take their default.
    pub fn from_snapshot(options: &OptionsSnapshot) -> Self {
        use names::*;

        let defaults = Self::default();
        let flag = |name: &str, default: bool| options.flag(&option_key(name)).unwrap_or(default);
        let list = |name: &str| {
            options
                .text(&option_key(name))
                .map(|raw| split_list(&raw))
                .unwrap_or_default()
        };

        let optimization_level = options
            .text(&option_key(OPTIMIZATION_LEVEL))
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.optimization_level);

        let cdn_url = options
            .text(&option_key(CDN_URL))
            .map(|raw| raw.trim().trim_end_matches('/').to_string())
            .unwrap_or_default();

        Self {
            enable_caching: flag(ENABLE_CACHING, defaults.enable_caching),
            enable_minification: flag(ENABLE_MINIFICATION, defaults.enable_minification),
            enable_compression: flag(ENABLE_COMPRESSION, defaults.enable_compression),
            enable_image_optimization: flag(
                ENABLE_IMAGE_OPTIMIZATION,
                defaults.enable_image_optimization,
            ),
            optimization_level,
            cdn_url,
            exclude_files: list(EXCLUDE_FILES),
            cache_expiration: options
                .unsigned(&option_key(CACHE_EXPIRATION))
                .unwrap_or(defaults.cache_expiration),
            enable_page_caching: flag(ENABLE_PAGE_CACHING, defaults.enable_page_caching),
            enable_cache_preloading: flag(
                ENABLE_CACHE_PRELOADING,
                defaults.enable_cache_preloading,
            ),
            enable_mobile_cache: flag(ENABLE_MOBILE_CACHE, defaults.enable_mobile_cache),
            cache_logged_users: flag(CACHE_LOGGED_USERS, defaults.cache_logged_users),
            cache_query_strings: flag(CACHE_QUERY_STRINGS, defaults.cache_query_strings),
            user_agent_cache: flag(USER_AGENT_CACHE, defaults.user_agent_cache),
            enable_concatenation: flag(ENABLE_CONCATENATION, defaults.enable_concatenation),
            defer_js_loading: flag(DEFER_JS_LOADING, defaults.defer_js_loading),
            webp_conversion: flag(WEBP_CONVERSION, defaults.webp_conversion),
            exclude_cart_checkout: flag(EXCLUDE_CART_CHECKOUT, defaults.exclude_cart_checkout),
            heartbeat_control: flag(HEARTBEAT_CONTROL, defaults.heartbeat_control),
            heartbeat_frequency: options
                .unsigned(&option_key(HEARTBEAT_FREQUENCY))
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.heartbeat_frequency),
            preconnect_domains: list(PRECONNECT_DOMAINS),
            bypass_cookies: list(BYPASS_COOKIES),
            cache_exclude_paths: list(CACHE_EXCLUDE_PATHS),
        }
    }

    /// Documented default for every setting, keyed by setting name.
    pub fn default_values() -> Vec<(&'static str, Value)> {
        use names::*;

        vec![
            (ENABLE_CACHING, json!(1)),
            (ENABLE_MINIFICATION, json!(1)),
            (ENABLE_COMPRESSION, json!(1)),
            (ENABLE_IMAGE_OPTIMIZATION, json!(1)),
            (OPTIMIZATION_LEVEL, json!(OptimizationLevel::Moderate.as_str())),
            (CDN_URL, json!("")),
            (EXCLUDE_FILES, json!("")),
            (CACHE_EXPIRATION, json!(DEFAULT_CACHE_EXPIRATION_SECS)),
            (ENABLE_PAGE_CACHING, json!(1)),
            (ENABLE_CACHE_PRELOADING, json!(0)),
            (ENABLE_MOBILE_CACHE, json!(1)),
            (CACHE_LOGGED_USERS, json!(0)),
            (CACHE_QUERY_STRINGS, json!(0)),
            (USER_AGENT_CACHE, json!(0)),
            (ENABLE_CONCATENATION, json!(0)),
            (DEFER_JS_LOADING, json!(0)),
            (WEBP_CONVERSION, json!(0)),
            (EXCLUDE_CART_CHECKOUT, json!(1)),
            (HEARTBEAT_CONTROL, json!(0)),
            (HEARTBEAT_FREQUENCY, json!(DEFAULT_HEARTBEAT_FREQUENCY_SECS)),
            (PRECONNECT_DOMAINS, json!("")),
            (BYPASS_COOKIES, json!("")),
            (CACHE_EXCLUDE_PATHS, json!("")),
        ]
    }

    pub fn is_setting_name(name: &str) -> bool {
        Self::default_values()
            .iter()
            .any(|(candidate, _)| *candidate == name)
    }

    /// Whether `path` matches one of the excluded-file patterns.
    pub fn is_excluded_file(&self, path: &str) -> bool {
        self.exclude_files
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }
}
