//! HTTP surface: the site front, cached assets and the admin API.

mod admin;
mod assets;
mod middleware;
mod site;

pub use admin::{ADMIN_PREFIX, AdminState, build_admin_router};
pub use middleware::RequestContext;
pub use site::{HttpState, build_site_router, page_request_from};

use axum::{Router, middleware as axum_middleware};

/// The complete application router. The admin API is mounted only when an
/// admin state (and so a token) is supplied.
pub fn build_router(state: HttpState, admin: Option<AdminState>) -> Router {
    let mut router = Router::new();
    if let Some(admin) = admin {
        router = router.nest(ADMIN_PREFIX, build_admin_router(admin));
    }

    router
        .merge(build_site_router(state))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
