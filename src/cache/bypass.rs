//! Decides which requests must never be served from or written to the page cache.
//!
//! Cookie names are only a heuristic for "this visitor sees personalised
//! content", so every list here is configurable.

use std::fmt;

use serde::Serialize;

use crate::domain::request::PageRequest;

use super::config::{CacheConfig, CacheRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    UnsafeMethod,
    Admin,
    ExcludedPath,
    QueryString,
    LoggedIn,
    PersonalisedSession,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::UnsafeMethod => "unsafe_method",
            BypassReason::Admin => "admin",
            BypassReason::ExcludedPath => "excluded_path",
            BypassReason::QueryString => "query_string",
            BypassReason::LoggedIn => "logged_in",
            BypassReason::PersonalisedSession => "personalised_session",
        }
    }
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BypassPolicy<'a> {
    config: &'a CacheConfig,
    rules: &'a CacheRules,
}

impl<'a> BypassPolicy<'a> {
    pub fn new(config: &'a CacheConfig, rules: &'a CacheRules) -> Self {
        Self { config, rules }
    }

    /// The first reason `request` must bypass the cache, if any.
    pub fn evaluate(&self, request: &PageRequest) -> Option<BypassReason> {
        if !request.method.is_safe() {
            return Some(BypassReason::UnsafeMethod);
        }
        if request.admin {
            return Some(BypassReason::Admin);
        }
        if self
            .rules
            .excluded_paths
            .iter()
            .any(|prefix| path_matches(&request.path, prefix))
        {
            return Some(BypassReason::ExcludedPath);
        }
        if !self.rules.keys.query_strings && request.has_query() {
            return Some(BypassReason::QueryString);
        }
        if !self.rules.cache_logged_users
            && has_cookie_with_prefix(request, &self.config.logged_in_cookies)
        {
            return Some(BypassReason::LoggedIn);
        }
        if has_cookie_with_prefix(request, &self.config.session_cookies)
            || has_cookie_with_prefix(request, &self.rules.extra_bypass_cookies)
        {
            return Some(BypassReason::PersonalisedSession);
        }
        None
    }
}

fn has_cookie_with_prefix(request: &PageRequest, prefixes: &[String]) -> bool {
    request.cookies.iter().any(|name| {
        prefixes
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .any(|prefix| name.starts_with(prefix.as_str()))
    })
}

/// Segment-aware prefix match: `/cart` covers `/cart` and `/cart/x`, not `/cartography`.
fn path_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{request::RequestMethod, settings::OptimizationSettings, tier::Tier};

    use super::*;

    fn fixtures(settings: OptimizationSettings, tier: Tier) -> (CacheConfig, CacheRules) {
        (
            CacheConfig::for_content_dir("/tmp/unused"),
            CacheRules::from_settings(&settings, tier),
        )
    }

    #[test]
    fn anonymous_get_is_cacheable() {
        let (config, rules) = fixtures(OptimizationSettings::default(), Tier::Free);
        let policy = BypassPolicy::new(&config, &rules);
        assert_eq!(policy.evaluate(&PageRequest::get("/about")), None);
    }

    #[test]
    fn writes_and_admin_bypass() {
        let (config, rules) = fixtures(OptimizationSettings::default(), Tier::Free);
        let policy = BypassPolicy::new(&config, &rules);

        let post = PageRequest::get("/about").with_method(RequestMethod::parse("POST"));
        assert_eq!(policy.evaluate(&post), Some(BypassReason::UnsafeMethod));

        let admin = PageRequest::get("/wp-admin/").as_admin();
        assert_eq!(policy.evaluate(&admin), Some(BypassReason::Admin));
    }

    #[test]
    fn cart_paths_bypass_on_segment_boundaries() {
        let (config, rules) = fixtures(OptimizationSettings::default(), Tier::Free);
        let policy = BypassPolicy::new(&config, &rules);

        assert_eq!(
            policy.evaluate(&PageRequest::get("/checkout/order-received/12")),
            Some(BypassReason::ExcludedPath)
        );
        assert_eq!(policy.evaluate(&PageRequest::get("/cartography")), None);
    }

    #[test]
    fn query_strings_bypass_unless_cached() {
        let (config, rules) = fixtures(OptimizationSettings::default(), Tier::Free);
        let request = PageRequest::get("/").with_query("s=shoes");
        assert_eq!(
            BypassPolicy::new(&config, &rules).evaluate(&request),
            Some(BypassReason::QueryString)
        );

        let (config, rules) = fixtures(
            OptimizationSettings {
                cache_query_strings: true,
                ..Default::default()
            },
            Tier::Free,
        );
        assert_eq!(BypassPolicy::new(&config, &rules).evaluate(&request), None);
    }

    #[test]
    fn logged_in_visitors_bypass_unless_unlocked() {
        let request = PageRequest::get("/").with_cookie("wordpress_logged_in_3f2a");
        let settings = OptimizationSettings {
            cache_logged_users: true,
            ..Default::default()
        };

        let (config, rules) = fixtures(settings.clone(), Tier::Premium);
        assert_eq!(
            BypassPolicy::new(&config, &rules).evaluate(&request),
            Some(BypassReason::LoggedIn)
        );

        let (config, rules) = fixtures(settings, Tier::Agency);
        assert_eq!(BypassPolicy::new(&config, &rules).evaluate(&request), None);
    }

    #[test]
    fn cart_cookies_and_configured_cookies_bypass() {
        let (config, rules) = fixtures(
            OptimizationSettings {
                bypass_cookies: vec!["edd_items_in_cart".to_string()],
                ..Default::default()
            },
            Tier::Free,
        );
        let policy = BypassPolicy::new(&config, &rules);

        let cart = PageRequest::get("/").with_cookie("woocommerce_items_in_cart");
        let edd = PageRequest::get("/").with_cookie("edd_items_in_cart");
        let harmless = PageRequest::get("/").with_cookie("_ga");
        assert_eq!(
            policy.evaluate(&cart),
            Some(BypassReason::PersonalisedSession)
        );
        assert_eq!(
            policy.evaluate(&edd),
            Some(BypassReason::PersonalisedSession)
        );
        assert_eq!(policy.evaluate(&harmless), None);
    }
}
