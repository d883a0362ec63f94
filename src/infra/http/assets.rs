//! Serves the minified and bundled copies written by the asset stages.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;

use crate::{application::error::ErrorReport, optimize::assets::AssetKind};

use super::site::HttpState;

const SOURCE: &str = "infra::http::assets::serve_cached_asset";

pub async fn serve_cached_asset(
    State(state): State<HttpState>,
    Path(path): Path<String>,
) -> Response {
    let Some(file) = resolve_asset(state.optimizer.assets().root(), &path) else {
        return not_found_response();
    };

    match tokio::fs::read(&file).await {
        Ok(contents) => build_response(
            Bytes::from(contents),
            mime_guess::from_path(&file).first_or_octet_stream(),
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => not_found_response(),
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

/// Only files directly inside one of the asset directories resolve; pages
/// share the cache root but are never served from here.
fn resolve_asset(root: &FsPath, path: &str) -> Option<PathBuf> {
    let candidate = path.trim_start_matches('/');
    if candidate.is_empty() || candidate.ends_with('/') {
        return None;
    }

    let relative = FsPath::new(candidate);
    let mut components = relative.components();
    let dir = match components.next()? {
        Component::Normal(dir) => dir.to_str()?,
        _ => return None,
    };
    let served = [AssetKind::Css, AssetKind::Js, AssetKind::Bundle]
        .iter()
        .any(|kind| kind.dir() == dir);
    if !served {
        return None;
    }

    match (components.next()?, components.next()) {
        (Component::Normal(_), None) => Some(root.join(relative)),
        _ => None,
    }
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Cached asset not found")
        .attach(&mut response);
    response
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    // Names are content hashes, so a copy never changes under its URL.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_flat_files_in_asset_dirs_resolve() {
        let root = FsPath::new("/srv/cache");
        assert_eq!(
            resolve_asset(root, "css/abc.css"),
            Some(PathBuf::from("/srv/cache/css/abc.css"))
        );
        assert_eq!(
            resolve_asset(root, "/concat/abc.css"),
            Some(PathBuf::from("/srv/cache/concat/abc.css"))
        );

        for rejected in [
            "",
            "css/",
            "pages/abc.html",
            "css/../pages/abc.html",
            "../secret",
            "js/nested/abc.js",
            "css",
        ] {
            assert_eq!(resolve_asset(root, rejected), None, "{rejected}");
        }
    }
}
