//! Token-guarded admin API, nested under `/_speed-optimizer`.
//!
//! Every call needs `Authorization: Bearer <admin token>`. Without a
//! configured token the router is never mounted.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::{
    error::{ErrorReport, HttpError},
    license::Actor,
    operations::SiteOperations,
};

/// Mount point for [`build_admin_router`].
pub const ADMIN_PREFIX: &str = "/_speed-optimizer";

const ADMIN_ACTOR: &str = "admin-api";

#[derive(Clone)]
pub struct AdminState {
    pub operations: SiteOperations,
    token: Arc<str>,
}

impl AdminState {
    pub fn new(operations: SiteOperations, token: impl Into<Arc<str>>) -> Self {
        Self {
            operations,
            token: token.into(),
        }
    }

    fn accepts(&self, presented: &str) -> bool {
        presented.as_bytes().ct_eq(self.token.as_bytes()).into()
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/clear", post(clear_cache))
        .route("/cache/stats", get(cache_stats))
        .route("/license", get(license_status))
        .route("/license/activate", post(activate_license))
        .route("/license/deactivate", post(deactivate_license))
        .route("/license/check", post(check_license))
        .route("/settings/export", get(export_settings))
        .route("/settings/import", post(import_settings))
        .route("/capabilities", get(capabilities))
        .route("/wiring", get(wiring))
        .fallback(admin_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    const SOURCE: &str = "infra::http::admin::admin_auth";

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if state.accepts(token) => next.run(request).await,
        Some(_) => {
            HttpError::new(SOURCE, StatusCode::FORBIDDEN, "Forbidden", "admin token mismatch")
                .into_response()
        }
        None => HttpError::new(
            SOURCE,
            StatusCode::FORBIDDEN,
            "Forbidden",
            "missing bearer token",
        )
        .into_response(),
    }
}

async fn admin_not_found() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(
        "infra::http::admin::admin_not_found",
        StatusCode::NOT_FOUND,
        "Unknown admin endpoint",
    )
    .attach(&mut response);
    response
}

fn actor() -> Actor {
    Actor::manager(ADMIN_ACTOR)
}

async fn clear_cache(State(state): State<AdminState>) -> Result<StatusCode, HttpError> {
    state.operations.clear_cache().await?;
    info!(target = "speed_optimizer::admin", "page cache cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn cache_stats(State(state): State<AdminState>) -> Result<Response, HttpError> {
    let stats = state.operations.cache_stats().await?;
    Ok(Json(stats).into_response())
}

async fn license_status(State(state): State<AdminState>) -> Response {
    let info = state
        .operations
        .license()
        .resolver()
        .info_at(OffsetDateTime::now_utc())
        .await;
    Json(info).into_response()
}

#[derive(Debug, Deserialize)]
struct ActivateBody {
    key: String,
}

async fn activate_license(
    State(state): State<AdminState>,
    Json(body): Json<ActivateBody>,
) -> Result<Response, HttpError> {
    let info = state.operations.license().activate(&actor(), &body.key).await?;
    Ok(Json(info).into_response())
}

async fn deactivate_license(State(state): State<AdminState>) -> Result<Response, HttpError> {
    let info = state.operations.license().deactivate(&actor()).await?;
    Ok(Json(info).into_response())
}

async fn check_license(State(state): State<AdminState>) -> Result<Response, HttpError> {
    let info = state.operations.license().refresh().await?;
    Ok(Json(info).into_response())
}

async fn export_settings(State(state): State<AdminState>) -> Result<Response, HttpError> {
    let now = OffsetDateTime::now_utc();
    let document = state.operations.export_settings(now).await?;
    let filename = format!(
        "attachment; filename=\"speed-optimizer-settings-{}.json\"",
        now.date()
    );

    let mut response = document.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&filename) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    imported: usize,
}

async fn import_settings(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::admin::import_settings";

    let Ok(document) = std::str::from_utf8(&body) else {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid settings document",
            "body is not UTF-8",
        ));
    };
    let imported = state.operations.import_settings(document).await?;
    if imported == 0 {
        warn!(target = "speed_optimizer::admin", "settings import changed nothing");
    }
    Ok(Json(ImportSummary { imported }).into_response())
}

async fn capabilities(State(state): State<AdminState>) -> Response {
    let view = state
        .operations
        .capabilities_at(OffsetDateTime::now_utc())
        .await;
    Json(view).into_response()
}

async fn wiring(State(state): State<AdminState>) -> Response {
    let wiring = state.operations.wiring_at(OffsetDateTime::now_utc()).await;
    Json(wiring).into_response()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::{
        application::{
            license::{LicenseService, OfflineAuthority},
            options::OptionsStore,
        },
        cache::{CacheConfig, PageCacheEngine},
        infra::options::MemoryOptionsStore,
    };

    use super::*;

    const TOKEN: &str = "0123456789abcdef0123";

    fn router(content_dir: &std::path::Path) -> Router {
        let store: Arc<dyn OptionsStore> = Arc::new(MemoryOptionsStore::default());
        let license = LicenseService::new(Arc::clone(&store), Arc::new(OfflineAuthority));
        let engine = PageCacheEngine::new(CacheConfig::for_content_dir(content_dir));
        let operations = SiteOperations::new(store, license, engine);
        build_admin_router(AdminState::new(operations, TOKEN))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_tokens() {
        let dir = tempdir().unwrap();
        for token in [None, Some("wrong-token-wrong-token")] {
            let response = router(dir.path())
                .oneshot(request("GET", "/cache/stats", token, Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn unknown_endpoints_are_not_found_after_auth() {
        let dir = tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(request("GET", "/nope", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router(dir.path())
            .oneshot(request("GET", "/nope", Some(TOKEN), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn activation_unlocks_capabilities() {
        let dir = tempdir().unwrap();
        let app = router(dir.path());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/license/activate",
                Some(TOKEN),
                Body::from(r#"{"key":"AGENCY-1234-5678-9012"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/capabilities", Some(TOKEN), Body::empty()))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["tier"], "agency");
        assert!(
            view["features"]
                .as_array()
                .unwrap()
                .iter()
                .all(|feature| feature["available"] == true)
        );
    }

    #[tokio::test]
    async fn rejects_blank_license_keys() {
        let dir = tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(request(
                "POST",
                "/license/activate",
                Some(TOKEN),
                Body::from(r#"{"key":"   "}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn settings_export_is_an_attachment_and_import_counts() {
        let dir = tempdir().unwrap();
        let app = router(dir.path());

        let response = app
            .clone()
            .oneshot(request("GET", "/settings/export", Some(TOKEN), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"speed-optimizer-settings-"));

        let response = app
            .oneshot(request(
                "POST",
                "/settings/import",
                Some(TOKEN),
                Body::from(
                    r#"{"version":"1.0","settings":{"enable_page_caching":true,"cache_expiration":600}}"#,
                ),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"imported":2}"#);
    }

    #[tokio::test]
    async fn clearing_cache_answers_no_content() {
        let dir = tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(request("POST", "/cache/clear", Some(TOKEN), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
