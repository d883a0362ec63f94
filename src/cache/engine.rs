//! The page cache state machine: BYPASS, LOOKUP, HIT, MISS→CAPTURE.
//!
//! Every storage failure is logged and turned into a miss or a skipped
//! capture. Nothing here can fail a page delivery.

use metrics::counter;
use serde::Serialize;
use time::{Duration, OffsetDateTime, macros::format_description};
use tracing::{debug, info, warn};

use crate::domain::request::PageRequest;

use super::{
    bypass::{BypassPolicy, BypassReason},
    config::{CacheConfig, CacheRules},
    keys::CacheKey,
    store::{PageStore, StoreError, StoreStats, remove_tree},
};

const METRIC_HIT: &str = "speed_optimizer_page_cache_hit_total";
const METRIC_MISS: &str = "speed_optimizer_page_cache_miss_total";
const METRIC_BYPASS: &str = "speed_optimizer_page_cache_bypass_total";
const METRIC_CAPTURE_SKIPPED: &str = "speed_optimizer_page_cache_capture_skipped_total";
const METRIC_PURGE: &str = "speed_optimizer_page_cache_purge_total";

/// A fresh entry found during lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub key: CacheKey,
    pub content: String,
    pub generated_at: OffsetDateTime,
}

impl CachedPage {
    /// The stored content verbatim, followed by the diagnostic trailer.
    pub fn body(&self) -> String {
        format!("{}{}", self.content, trailer(self.generated_at))
    }
}

pub fn trailer(generated_at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    let stamp = generated_at
        .to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_else(|_| generated_at.unix_timestamp().to_string());
    format!("\n<!-- Cached page served by Speed Optimizer, generated {stamp} -->")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Bypass(BypassReason),
    Hit(CachedPage),
    /// Generate normally, then offer the body to [`PageCacheEngine::capture`].
    Miss(CacheKey),
}

impl CacheDecision {
    pub fn label(&self) -> &'static str {
        match self {
            CacheDecision::Bypass(_) => "BYPASS",
            CacheDecision::Hit(_) => "HIT",
            CacheDecision::Miss(_) => "MISS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooSmall,
    /// Larger than the middleware is willing to buffer, or of unknown length.
    TooLarge,
    NotHtml,
    WriteFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::TooSmall => "too_small",
            SkipReason::TooLarge => "too_large",
            SkipReason::NotHtml => "not_html",
            SkipReason::WriteFailed => "write_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct PageCacheEngine {
    config: CacheConfig,
    store: PageStore,
}

impl PageCacheEngine {
    pub fn new(config: CacheConfig) -> Self {
        let store = PageStore::new(config.pages_dir());
        Self { config, store }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub async fn classify(
        &self,
        request: &PageRequest,
        rules: &CacheRules,
        now: OffsetDateTime,
    ) -> CacheDecision {
        if let Some(reason) = BypassPolicy::new(&self.config, rules).evaluate(request) {
            debug!(
                target = "speed_optimizer::cache",
                path = %request.path,
                reason = reason.as_str(),
                "page cache bypassed"
            );
            counter!(METRIC_BYPASS, "reason" => reason.as_str()).increment(1);
            return CacheDecision::Bypass(reason);
        }

        let key = CacheKey::derive(request, &rules.keys);
        let stored = match self.store.read(&key).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    target = "speed_optimizer::cache",
                    key = %key,
                    error = %err,
                    "page cache read failed; treating as miss"
                );
                None
            }
        };

        match stored {
            Some(page) if is_fresh(page.modified, now, rules.expiration_secs) => {
                debug!(target = "speed_optimizer::cache", path = %request.path, key = %key, "page cache hit");
                counter!(METRIC_HIT).increment(1);
                CacheDecision::Hit(CachedPage {
                    key,
                    content: page.content,
                    generated_at: page.modified,
                })
            }
            stale => {
                debug!(
                    target = "speed_optimizer::cache",
                    path = %request.path,
                    key = %key,
                    stale = stale.is_some(),
                    "page cache miss"
                );
                counter!(METRIC_MISS).increment(1);
                CacheDecision::Miss(key)
            }
        }
    }

    /// Persist a freshly generated body under `key` if it looks like a full page.
    pub async fn capture(&self, key: &CacheKey, body: &str) -> CaptureOutcome {
        let outcome = match self.check_capturable(body) {
            Some(reason) => CaptureOutcome::Skipped(reason),
            None => match self.store.write(key, body).await {
                Ok(()) => CaptureOutcome::Stored,
                Err(err) => {
                    warn!(
                        target = "speed_optimizer::cache",
                        key = %key,
                        error = %err,
                        "page cache write failed"
                    );
                    CaptureOutcome::Skipped(SkipReason::WriteFailed)
                }
            },
        };

        match outcome {
            CaptureOutcome::Stored => {
                debug!(target = "speed_optimizer::cache", key = %key, bytes = body.len(), "page captured");
                outcome
            }
            CaptureOutcome::Skipped(reason) => self.skip(key, reason),
        }
    }

    /// Record that the page under `key` was not stored.
    pub fn skip(&self, key: &CacheKey, reason: SkipReason) -> CaptureOutcome {
        debug!(
            target = "speed_optimizer::cache",
            key = %key,
            reason = reason.as_str(),
            "page capture skipped"
        );
        counter!(METRIC_CAPTURE_SKIPPED, "reason" => reason.as_str()).increment(1);
        CaptureOutcome::Skipped(reason)
    }

    fn check_capturable(&self, body: &str) -> Option<SkipReason> {
        if body.len() < self.config.min_capture_bytes {
            return Some(SkipReason::TooSmall);
        }
        if !looks_like_html(body) {
            return Some(SkipReason::NotHtml);
        }
        None
    }

    /// Delete the whole cache tree: pages and every asset directory.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        remove_tree(&self.config.root).await?;
        counter!(METRIC_PURGE).increment(1);
        info!(
            target = "speed_optimizer::cache",
            root = %self.config.root.display(),
            "cache cleared"
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats().await
    }
}

fn is_fresh(modified: OffsetDateTime, now: OffsetDateTime, expiration_secs: u64) -> bool {
    let max_age = Duration::seconds(i64::try_from(expiration_secs).unwrap_or(i64::MAX));
    now - modified <= max_age
}

fn looks_like_html(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    lowered.contains("<html") || lowered.contains("<!doctype")
}
