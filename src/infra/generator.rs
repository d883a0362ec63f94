//! Page generation: what runs when the page cache misses or is bypassed.

use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use axum::http::{
    HeaderMap, HeaderName, StatusCode,
    header::{CACHE_CONTROL, CONTENT_LANGUAGE, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, USER_AGENT},
};
use bytes::Bytes;
use reqwest::{Client, Method, Url, redirect};
use thiserror::Error;
use tracing::debug;

use crate::domain::request::PageRequest;

/// Origin response headers worth passing on to the visitor.
const FORWARDED_RESPONSE_HEADERS: [HeaderName; 4] =
    [CACHE_CONTROL, CONTENT_LANGUAGE, LOCATION, SET_COOKIE];

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("origin request failed: {0}")]
    Origin(#[from] reqwest::Error),
    #[error("invalid origin URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct GeneratedPage {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GeneratedPage {
    pub fn html(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: Some("text/html; charset=UTF-8".to_string()),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|value| value.starts_with("text/html"))
    }
}

#[async_trait]
pub trait PageGenerator: Send + Sync {
    async fn generate(&self, request: &PageRequest) -> Result<GeneratedPage, GenerateError>;
}

/// Forwards each request to an origin site and relays its answer.
#[derive(Debug, Clone)]
pub struct OriginGenerator {
    client: Client,
    base: Url,
}

impl OriginGenerator {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("speed-optimizer/", env!("CARGO_PKG_VERSION"))
    }

    fn url_for(&self, request: &PageRequest) -> Result<Url, GenerateError> {
        let mut url = self.base.join(request.path.trim_start_matches('/'))?;
        url.set_query(request.query.as_deref().filter(|query| !query.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl PageGenerator for OriginGenerator {
    async fn generate(&self, request: &PageRequest) -> Result<GeneratedPage, GenerateError> {
        let url = self.url_for(request)?;
        let method = Method::from_bytes(request.method.to_string().as_bytes()).unwrap_or(Method::GET);

        let mut outgoing = self.client.request(method, url.clone());
        if let Some(cookie) = request.cookie_header.as_deref() {
            outgoing = outgoing.header(COOKIE, cookie);
        }
        if let Some(agent) = request.user_agent.as_deref() {
            outgoing = outgoing.header(USER_AGENT, agent);
        }

        let response = outgoing.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut headers = HeaderMap::new();
        for name in FORWARDED_RESPONSE_HEADERS {
            for value in response.headers().get_all(&name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let body = response.bytes().await?;
        debug!(
            target = "speed_optimizer::generator",
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            "origin responded"
        );

        Ok(GeneratedPage {
            status,
            content_type,
            headers,
            body,
        })
    }
}

/// Serves pre-rendered files: `/` → `index.html`, `/about` → `about.html` or
/// `about/index.html`, and any other existing file by its own name.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    root: PathBuf,
}

impl StaticGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Vec::new();
        }

        let base = self.root.join(relative);
        if path.ends_with('/') || relative.as_os_str().is_empty() {
            return vec![base.join("index.html")];
        }
        vec![
            base.clone(),
            base.with_extension("html"),
            base.join("index.html"),
        ]
    }
}

#[async_trait]
impl PageGenerator for StaticGenerator {
    async fn generate(&self, request: &PageRequest) -> Result<GeneratedPage, GenerateError> {
        for candidate in self.candidates(&request.path) {
            match tokio::fs::metadata(&candidate).await {
                Ok(metadata) if metadata.is_file() => {
                    let body = tokio::fs::read(&candidate)
                        .await
                        .map_err(|source| GenerateError::Io {
                            path: candidate.clone(),
                            source,
                        })?;
                    let content_type = mime_guess::from_path(&candidate)
                        .first_raw()
                        .map(|mime| match mime {
                            "text/html" => "text/html; charset=UTF-8".to_string(),
                            other => other.to_string(),
                        });
                    return Ok(GeneratedPage {
                        status: StatusCode::OK,
                        content_type,
                        headers: HeaderMap::new(),
                        body: Bytes::from(body),
                    });
                }
                _ => continue,
            }
        }

        Ok(GeneratedPage::html(
            StatusCode::NOT_FOUND,
            "<!DOCTYPE html><html><body><h1>Not Found</h1></body></html>",
        ))
    }
}
