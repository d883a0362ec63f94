//! Page cache middleware.
//!
//! Sits between request planning and page generation: lookups happen before
//! the generator runs, captures after every document stage and before any
//! transport encoding.

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderValue, Request, StatusCode,
        header::{CONTENT_ENCODING, CONTENT_TYPE, SET_COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::{application::wiring::RequestPlan, util::bytes::body_within};

use super::engine::{CacheDecision, PageCacheEngine, SkipReason};

/// Response header carrying the cache state (`HIT`, `MISS`, `BYPASS`).
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Largest generated body the middleware will buffer for capture.
pub const MAX_CAPTURE_BODY_BYTES: usize = 8 * 1024 * 1024;

const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Runs the engine around the inner handler. Requests without a
/// [`RequestPlan`], or whose wiring leaves the page cache off, pass through
/// untouched.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(engine): State<PageCacheEngine>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(plan) = request.extensions().get::<RequestPlan>().cloned() else {
        return next.run(request).await;
    };
    let Some(rules) = plan.wiring.cache_rules.as_ref() else {
        return next.run(request).await;
    };

    let decision = engine
        .classify(&plan.request, rules, OffsetDateTime::now_utc())
        .await;

    match decision {
        CacheDecision::Hit(page) => {
            let mut response = (
                [(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE))],
                page.body(),
            )
                .into_response();
            mark(&mut response, "HIT");
            response
        }
        CacheDecision::Bypass(_) => {
            let mut response = next.run(request).await;
            mark(&mut response, "BYPASS");
            response
        }
        CacheDecision::Miss(key) => {
            let response = next.run(request).await;
            if !is_capturable(&response) {
                let mut response = response;
                mark(&mut response, "MISS");
                return response;
            }

            if !body_within(response.body(), MAX_CAPTURE_BODY_BYTES) {
                engine.skip(&key, SkipReason::TooLarge);
                let mut response = response;
                mark(&mut response, "MISS");
                return response;
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_CAPTURE_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        target = "speed_optimizer::cache",
                        key = %key,
                        error = %err,
                        "generated page body failed while buffering"
                    );
                    return StatusCode::BAD_GATEWAY.into_response();
                }
            };

            match std::str::from_utf8(&bytes) {
                Ok(html) => {
                    engine.capture(&key, html).await;
                }
                Err(_) => {
                    debug!(target = "speed_optimizer::cache", key = %key, "generated page is not UTF-8");
                }
            }

            let mut response = Response::from_parts(parts, Body::from(bytes));
            mark(&mut response, "MISS");
            response
        }
    }
}

/// Only complete, shareable HTML is worth storing; a response that sets a
/// cookie belongs to one visitor.
fn is_capturable(response: &Response) -> bool {
    let headers = response.headers();
    response.status() == StatusCode::OK
        && !headers.contains_key(CONTENT_ENCODING)
        && !headers.contains_key(SET_COOKIE)
        && headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_none_or(|value| value.starts_with("text/html"))
}

fn mark(response: &mut Response, label: &'static str) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(label));
}
