//! The site front: every request that is not an admin call or a cached asset
//! is planned, looked up in the page cache, generated, optimized and
//! delivered here.

use std::{sync::Arc, time::Instant};

use axum::{
    Extension, Router,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, StatusCode,
        header::{
            ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, USER_AGENT,
            VARY,
        },
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use metrics::histogram;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    application::{error::HttpError, operations::SiteOperations, wiring::RequestPlan},
    cache::{CACHE_DIR_NAME, page_cache_layer},
    domain::request::{PageRequest, RequestMethod},
    infra::generator::{GeneratedPage, PageGenerator},
    optimize::{
        Optimizer,
        compress::{gzip, should_compress},
        pipeline::LifecyclePoint,
    },
    util::bytes::body_within,
};

use super::assets::serve_cached_asset;

const METRIC_GENERATE_MS: &str = "speed_optimizer_generate_ms";

/// Largest body the delivery layer will buffer for compression.
const MAX_DELIVERY_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct HttpState {
    pub operations: SiteOperations,
    pub generator: Arc<dyn PageGenerator>,
    pub optimizer: Optimizer,
    pub admin_path_prefixes: Arc<[String]>,
}

/// Site routes with their middleware stack, outermost first: request
/// planning, delivery (headers and transport encoding), page cache, then
/// generation.
pub fn build_site_router(state: HttpState) -> Router {
    let engine = state.operations.engine().clone();
    let pages = Router::new()
        .fallback(render_page)
        .layer(middleware::from_fn_with_state(engine, page_cache_layer))
        .layer(middleware::from_fn_with_state(state.clone(), deliver))
        .layer(middleware::from_fn_with_state(state.clone(), plan_request));

    let assets_route = format!(
        "{}/cache/{CACHE_DIR_NAME}/{{*path}}",
        state.optimizer.site().content_url_path
    );

    Router::new()
        .route(&assets_route, get(serve_cached_asset))
        .merge(pages)
        .with_state(state)
}

/// Build the neutral request model and wire it against the options and
/// license in force right now.
pub async fn plan_request(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let page = page_request_from(&request, &state.admin_path_prefixes);
    let wiring = state.operations.wiring_at(OffsetDateTime::now_utc()).await;
    debug!(
        target = "speed_optimizer::http::plan",
        path = %page.path,
        admin = page.admin,
        tier = wiring.tier.as_str(),
        behaviors = wiring.behaviors.len(),
        stages = wiring.pipeline.len(),
        "request planned"
    );

    request.extensions_mut().insert(RequestPlan {
        request: page,
        wiring: Arc::new(wiring),
    });
    next.run(request).await
}

/// Header stages and the transport stage. Runs outside the page cache so
/// hits get them too and stored pages stay unencoded.
pub async fn deliver(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let plan = request.extensions().get::<RequestPlan>().cloned();
    let mut response = next.run(request).await;

    let Some(plan) = plan else {
        return response;
    };
    if plan.request.admin {
        return response;
    }

    let pipeline = &plan.wiring.pipeline;
    if response.status() == StatusCode::OK {
        state
            .optimizer
            .apply_headers(response.headers_mut(), pipeline, OffsetDateTime::now_utc());
    }
    if pipeline.at(LifecyclePoint::Transport).next().is_none() {
        return response;
    }
    compress_response(&plan.request, response).await
}

async fn compress_response(request: &PageRequest, response: Response) -> Response {
    const SOURCE: &str = "infra::http::site::compress_response";

    let headers = response.headers();
    if headers.contains_key(CONTENT_ENCODING) || !is_compressible(headers) {
        return response;
    }
    if !body_within(response.body(), MAX_DELIVERY_BODY_BYTES) {
        debug!(
            target = "speed_optimizer::http::deliver",
            "body too large or unbounded; sending identity body"
        );
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_DELIVERY_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to deliver page",
                &err,
            )
            .into_response();
        }
    };

    if !should_compress(request, bytes.len()) {
        return Response::from_parts(parts, Body::from(bytes));
    }

    match gzip(&bytes) {
        Ok(encoded) => {
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts
                .headers
                .append(VARY, HeaderValue::from_static("Accept-Encoding"));
            parts.headers.remove(CONTENT_LENGTH);
            debug!(
                target = "speed_optimizer::http::deliver",
                before = bytes.len(),
                after = encoded.len(),
                "response compressed"
            );
            Response::from_parts(parts, Body::from(encoded))
        }
        Err(err) => {
            warn!(
                target = "speed_optimizer::http::deliver",
                error = %err,
                "gzip failed; sending identity body"
            );
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

fn is_compressible(headers: &HeaderMap) -> bool {
    const TEXTUAL: [&str; 6] = [
        "text/",
        "application/javascript",
        "application/json",
        "application/xml",
        "application/rss+xml",
        "image/svg+xml",
    ];
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| TEXTUAL.iter().any(|prefix| value.starts_with(prefix)))
}

/// Generate the page and run the document stages over it.
async fn render_page(
    State(state): State<HttpState>,
    Extension(plan): Extension<RequestPlan>,
) -> Response {
    const SOURCE: &str = "infra::http::site::render_page";

    let started = Instant::now();
    let page = match state.generator.generate(&plan.request).await {
        Ok(page) => page,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Origin unavailable",
                &err,
            )
            .into_response();
        }
    };
    histogram!(METRIC_GENERATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

    let optimize = !plan.request.admin
        && page.status == StatusCode::OK
        && page.is_html()
        && plan.wiring.pipeline.has_document_stages();
    let body = if optimize {
        optimize_body(&state.optimizer, &plan, page.body.clone()).await
    } else {
        page.body.clone()
    };

    page_response(page, body)
}

async fn optimize_body(optimizer: &Optimizer, plan: &RequestPlan, body: Bytes) -> Bytes {
    let Ok(html) = String::from_utf8(body.to_vec()) else {
        return body;
    };

    let optimizer = optimizer.clone();
    let wiring = plan.wiring.clone();
    match tokio::task::spawn_blocking(move || optimizer.apply_document(&html, &wiring.pipeline))
        .await
    {
        Ok(optimized) => Bytes::from(optimized),
        Err(err) => {
            warn!(
                target = "speed_optimizer::http::render",
                path = %plan.request.path,
                error = %err,
                "document optimization aborted"
            );
            body
        }
    }
}

fn page_response(page: GeneratedPage, body: Bytes) -> Response {
    let GeneratedPage {
        status,
        content_type,
        headers,
        ..
    } = page;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    for (name, value) in &headers {
        response_headers.append(name.clone(), value.clone());
    }
    if let Some(value) = content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
        response_headers.insert(CONTENT_TYPE, value);
    }
    response
}

/// The framework-neutral view of an incoming request.
pub fn page_request_from(request: &Request<Body>, admin_path_prefixes: &[String]) -> PageRequest {
    let headers = request.headers();
    let header_text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let cookie_values: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    let cookies = cookie_values
        .iter()
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let name = pair.split('=').next().unwrap_or_default().trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();

    let path = request.uri().path().to_string();
    let admin = admin_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()));

    PageRequest {
        method: RequestMethod::parse(request.method().as_str()),
        query: request.uri().query().map(str::to_string),
        cookies,
        cookie_header: (!cookie_values.is_empty()).then(|| cookie_values.join("; ")),
        user_agent: header_text(USER_AGENT),
        accept_encoding: header_text(ACCEPT_ENCODING),
        admin,
        path,
    }
}
