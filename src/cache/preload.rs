//! Cache preloading: synthetic anonymous GETs through the full site router,
//! so every miss goes through generation, the document stages and capture
//! exactly as a visitor's request would.

use std::collections::BTreeSet;

use axum::{
    Router,
    body::Body,
    http::{Request, header::USER_AGENT},
};
use serde::Serialize;
use tower::ServiceExt;
use tracing::{info, warn};

use super::middleware::CACHE_STATUS_HEADER;

const PRELOAD_USER_AGENT: &str = "speed-optimizer-preload";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    /// Paths that missed and were generated.
    pub warmed: Vec<String>,
    /// Paths already fresh in the cache.
    pub fresh: Vec<String>,
    /// Paths the page cache did not handle (bypassed, or cache off).
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl PreloadReport {
    pub fn total(&self) -> usize {
        self.warmed.len() + self.fresh.len() + self.skipped.len() + self.failed.len()
    }
}

#[derive(Clone)]
pub struct Preloader {
    router: Router,
}

impl Preloader {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Request each distinct path once, in order.
    pub async fn run(&self, paths: &[String]) -> PreloadReport {
        let mut report = PreloadReport::default();
        let mut seen = BTreeSet::new();

        for path in paths {
            let path = normalize(path);
            if !seen.insert(path.clone()) {
                continue;
            }
            self.preload_one(path, &mut report).await;
        }

        info!(
            target = "speed_optimizer::cache::preload",
            warmed = report.warmed.len(),
            fresh = report.fresh.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "cache preload finished"
        );
        report
    }

    async fn preload_one(&self, path: String, report: &mut PreloadReport) {
        let request = match Request::get(path.as_str())
            .header(USER_AGENT, PRELOAD_USER_AGENT)
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    target = "speed_optimizer::cache::preload",
                    path = %path,
                    error = %err,
                    "invalid preload path"
                );
                report.failed.push(path);
                return;
            }
        };

        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if !response.status().is_success() {
            warn!(
                target = "speed_optimizer::cache::preload",
                path = %path,
                status = response.status().as_u16(),
                "preload request failed"
            );
            report.failed.push(path);
            return;
        }

        let state = response
            .headers()
            .get(CACHE_STATUS_HEADER)
            .and_then(|value| value.to_str().ok());
        match state {
            Some("MISS") => report.warmed.push(path),
            Some("HIT") => report.fresh.push(path),
            _ => report.skipped.push(path),
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
