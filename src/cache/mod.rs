//! Page cache.
//!
//! Rendered pages are stored as files under
//! `<content>/cache/speed-optimizer/pages/<key>.html`, where the key is a hash
//! of the request attributes the current rules consider. Expiry is lazy: a
//! stale file is only noticed, and overwritten, on the next lookup.
//!
//! ```toml
//! [cache]
//! min_capture_bytes = 255
//! logged_in_cookies = ["wordpress_logged_in_", "wp-postpass_", "comment_author_"]
//! preload_paths = ["/", "/about"]
//! preload_interval_secs = 3600
//! ```

mod bypass;
mod config;
mod engine;
mod keys;
mod middleware;
mod preload;
mod store;

pub use bypass::{BypassPolicy, BypassReason};
pub use config::{
    CACHE_DIR_NAME, CART_CHECKOUT_PATHS, CacheConfig, CacheRules, DEFAULT_LOGGED_IN_COOKIES,
    DEFAULT_MIN_CAPTURE_BYTES, DEFAULT_PRELOAD_INTERVAL_SECS, DEFAULT_SESSION_COOKIES,
};
pub use engine::{CacheDecision, CachedPage, CaptureOutcome, PageCacheEngine, SkipReason, trailer};
pub use keys::{CacheKey, KeyOptions, sha256_hex};
pub use middleware::{CACHE_STATUS_HEADER, page_cache_layer};
pub use preload::{PreloadReport, Preloader};
pub use store::{PageStore, StoreError, StoreStats, StoredPage};
