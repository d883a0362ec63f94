//! Page cache configuration.
//!
//! [`CacheConfig`] is deployment-level and fixed for the life of the process.
//! [`CacheRules`] is derived per request from the stored options and the
//! effective license tier.

use std::path::PathBuf;

use crate::domain::{features::Feature, settings::OptimizationSettings, tier::Tier};

use super::keys::KeyOptions;

pub const DEFAULT_MIN_CAPTURE_BYTES: usize = 255;
pub const DEFAULT_PRELOAD_INTERVAL_SECS: u64 = 3600;

pub const DEFAULT_LOGGED_IN_COOKIES: [&str; 3] =
    ["wordpress_logged_in_", "wp-postpass_", "comment_author_"];

pub const DEFAULT_SESSION_COOKIES: [&str; 3] = [
    "woocommerce_items_in_cart",
    "woocommerce_cart_hash",
    "wp_woocommerce_session_",
];

/// Paths excluded when cart/checkout exclusion is on.
pub const CART_CHECKOUT_PATHS: [&str; 3] = ["/cart", "/checkout", "/my-account"];

/// Directory name under `<content>/cache/`.
pub const CACHE_DIR_NAME: &str = "speed-optimizer";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `<content>/cache/speed-optimizer`; pages and assets live below it.
    pub root: PathBuf,
    /// Bodies shorter than this are never captured.
    pub min_capture_bytes: usize,
    /// Cookie prefixes that mark a logged-in visitor.
    pub logged_in_cookies: Vec<String>,
    /// Cookie prefixes that mark personalised state (cart, session).
    pub session_cookies: Vec<String>,
    pub preload_paths: Vec<String>,
    pub preload_interval_secs: u64,
}

impl CacheConfig {
    pub fn for_content_dir(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: content_dir.into().join("cache").join(CACHE_DIR_NAME),
            min_capture_bytes: DEFAULT_MIN_CAPTURE_BYTES,
            logged_in_cookies: DEFAULT_LOGGED_IN_COOKIES.map(String::from).to_vec(),
            session_cookies: DEFAULT_SESSION_COOKIES.map(String::from).to_vec(),
            preload_paths: vec!["/".to_string()],
            preload_interval_secs: DEFAULT_PRELOAD_INTERVAL_SECS,
        }
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join("pages")
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        Self {
            root: settings.site.content_dir.join("cache").join(CACHE_DIR_NAME),
            min_capture_bytes: cache.min_capture_bytes,
            logged_in_cookies: cache.logged_in_cookies.clone(),
            session_cookies: cache.session_cookies.clone(),
            preload_paths: cache.preload_paths.clone(),
            preload_interval_secs: cache.preload_interval.as_secs(),
        }
    }
}

/// Page cache rules in force for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRules {
    pub expiration_secs: u64,
    pub keys: KeyOptions,
    pub cache_logged_users: bool,
    pub excluded_paths: Vec<String>,
    pub extra_bypass_cookies: Vec<String>,
}

impl CacheRules {
    /// Settings that need a higher tier than the page cache itself only take
    /// effect when `tier` unlocks them.
    pub fn from_settings(settings: &OptimizationSettings, tier: Tier) -> Self {
        let mut excluded_paths = Vec::new();
        if settings.exclude_cart_checkout {
            excluded_paths.extend(CART_CHECKOUT_PATHS.map(String::from));
        }
        excluded_paths.extend(settings.cache_exclude_paths.iter().cloned());

        Self {
            expiration_secs: settings.cache_expiration,
            keys: KeyOptions {
                query_strings: settings.cache_query_strings,
                mobile: settings.enable_mobile_cache,
                user_agent: settings.user_agent_cache
                    && Feature::UserAgentCache.is_available_for(tier),
            },
            cache_logged_users: settings.cache_logged_users
                && Feature::CacheLoggedUsers.is_available_for(tier),
            excluded_paths,
            extra_bypass_cookies: settings.bypass_cookies.clone(),
        }
    }
}
