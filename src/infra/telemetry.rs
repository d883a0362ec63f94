use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Dependencies whose debug output drowns out cache decisions.
const QUIET_TARGETS: [&str; 3] = ["hyper=warn", "reqwest=warn", "lol_html=warn"];

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// `RUST_LOG` wins; otherwise the configured level, with noisy dependencies
/// held at warn.
fn env_filter(logging: &LoggingSettings) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        for directive in QUIET_TARGETS {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "speed_optimizer_page_cache_hit_total",
            Unit::Count,
            "Total number of page cache hits."
        );
        describe_counter!(
            "speed_optimizer_page_cache_miss_total",
            Unit::Count,
            "Total number of page cache misses, stale entries included."
        );
        describe_counter!(
            "speed_optimizer_page_cache_bypass_total",
            Unit::Count,
            "Total number of requests that bypassed the page cache, by reason."
        );
        describe_counter!(
            "speed_optimizer_page_cache_capture_skipped_total",
            Unit::Count,
            "Total number of generated pages not stored, by reason."
        );
        describe_counter!(
            "speed_optimizer_page_cache_purge_total",
            Unit::Count,
            "Total number of full cache clears."
        );
        describe_counter!(
            "speed_optimizer_license_activation_total",
            Unit::Count,
            "Total number of license activation attempts, by result."
        );
        describe_counter!(
            "speed_optimizer_license_refresh_total",
            Unit::Count,
            "Total number of license re-validations, by outcome."
        );
        describe_histogram!(
            "speed_optimizer_generate_ms",
            Unit::Milliseconds,
            "Page generation latency in milliseconds."
        );
    });
}
