//! HTML rewriting for the document stages, one `lol_html` pass per stage.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::Rc,
};

use lol_html::{
    EndTagHandler, RewriteStrSettings, element,
    errors::RewritingError,
    html_content::{ContentType, EndTag},
    rewrite_str,
};
use thiserror::Error;
use tracing::warn;

use super::{
    SiteContext,
    assets::{AssetCache, AssetKind},
    minify::Minifier,
    pipeline::Stage,
};

#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("html rewrite failed: {message}")]
    Rewrite { message: String },
}

impl From<RewritingError> for HtmlError {
    fn from(err: RewritingError) -> Self {
        Self::Rewrite {
            message: err.to_string(),
        }
    }
}

/// What the document stages need from the site.
#[derive(Clone, Copy)]
pub struct DocumentContext<'a> {
    pub site: &'a SiteContext,
    pub assets: &'a AssetCache,
    pub minifier: &'a dyn Minifier,
}

const VIEWPORT_META: &str =
    r#"<meta name="viewport" content="width=device-width, initial-scale=1">"#;

const DEFAULT_HINTS: &str = concat!(
    r#"<link rel="preconnect" href="https://fonts.googleapis.com">"#,
    r#"<link rel="preconnect" href="https://fonts.gstatic.com" crossorigin>"#,
    r#"<link rel="dns-prefetch" href="//www.google-analytics.com">"#,
);

const LAZY_LOAD_SCRIPT: &str = r#"<script>document.addEventListener("DOMContentLoaded",function(){var lazyImages=document.querySelectorAll("img[data-src]");if("IntersectionObserver" in window){var imageObserver=new IntersectionObserver(function(entries){entries.forEach(function(entry){if(entry.isIntersecting){var image=entry.target;image.src=image.dataset.src;image.classList.remove("lazy");imageObserver.unobserve(image);}});});lazyImages.forEach(function(image){imageObserver.observe(image);});}});</script>"#;

const ASYNC_HANDLES: [&str; 2] = ["google-analytics", "gtag"];
const ASYNC_SOURCES: [&str; 2] = ["google-analytics.com/", "googletagmanager.com/gtag/"];
const DEFER_HANDLES: [&str; 4] = ["jquery", "jquery-core", "jquery-migrate", "wp-embed"];

/// Run one document stage. Header and transport stages return the input.
pub fn apply(html: &str, stage: &Stage, ctx: DocumentContext<'_>) -> Result<String, HtmlError> {
    match stage {
        Stage::MinifyAssets { css, js, exclude } => minify_assets(html, *css, *js, exclude, ctx),
        Stage::ConcatenateStyles { exclude } => concatenate_styles(html, exclude, ctx),
        Stage::PerformanceHints { preconnect } => performance_hints(html, preconnect),
        Stage::HeartbeatSettings { interval_secs } => append_to(
            html,
            "head",
            &format!(
                "<script>window.heartbeatSettings=Object.assign(window.heartbeatSettings||{{}},{{interval:{interval_secs}}});</script>"
            ),
        ),
        Stage::ScriptLoading => script_loading(html),
        Stage::DeferScripts { exclude } => defer_scripts(html, exclude),
        Stage::LazyImages => lazy_images(html),
        Stage::WebpImages => rewrite_image_urls(html, |url| webp_sibling(url, ctx.assets)),
        Stage::CdnRewrite { cdn_url } => {
            rewrite_image_urls(html, |url| cdn_url_for(url, &ctx.site.site_url, cdn_url))
        }
        Stage::LazyLoadScript => append_to(html, "body", LAZY_LOAD_SCRIPT),
        Stage::CacheHeaders { .. } | Stage::Compress => Ok(html.to_string()),
    }
}

fn is_excluded(reference: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && reference.contains(pattern.as_str()))
}

fn cached_copy(ctx: DocumentContext<'_>, reference: &str, kind: AssetKind) -> Option<String> {
    match ctx.assets.minified(reference, kind, ctx.minifier) {
        Ok(url) => url,
        Err(err) => {
            warn!(
                target = "speed_optimizer::optimize::html",
                reference,
                error = %err,
                "asset left unminified"
            );
            None
        }
    }
}

fn minify_assets(
    html: &str,
    css: bool,
    js: bool,
    exclude: &[String],
    ctx: DocumentContext<'_>,
) -> Result<String, HtmlError> {
    let mut handlers = Vec::new();
    if css {
        handlers.push(element!(r#"link[rel~="stylesheet"][href]"#, |el| {
            if let Some(href) = el.get_attribute("href")
                && !is_excluded(&href, exclude)
                && let Some(url) = cached_copy(ctx, &href, AssetKind::Css)
            {
                el.set_attribute("href", &url)?;
            }
            Ok(())
        }));
    }
    if js {
        handlers.push(element!("script[src]", |el| {
            if let Some(src) = el.get_attribute("src")
                && !is_excluded(&src, exclude)
                && let Some(url) = cached_copy(ctx, &src, AssetKind::Js)
            {
                el.set_attribute("src", &url)?;
            }
            Ok(())
        }));
    }
    if handlers.is_empty() {
        return Ok(html.to_string());
    }

    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )?)
}

/// Bundle every local, screen-wide stylesheet into the position of the first.
fn concatenate_styles(
    html: &str,
    exclude: &[String],
    ctx: DocumentContext<'_>,
) -> Result<String, HtmlError> {
    let found = Rc::new(RefCell::new(Vec::<String>::new()));
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(r#"link[rel~="stylesheet"][href]"#, {
                let found = Rc::clone(&found);
                move |el| {
                    if screen_wide(el.get_attribute("media"))
                        && let Some(href) = el.get_attribute("href")
                        && !is_excluded(&href, exclude)
                        && ctx.assets.resolve_local(&href).is_some()
                    {
                        found.borrow_mut().push(href);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    let references = found.borrow().clone();
    let bundle_url = match ctx.assets.bundle(&references, None) {
        Ok(Some(url)) => url,
        Ok(None) => return Ok(html.to_string()),
        Err(err) => {
            warn!(
                target = "speed_optimizer::optimize::html",
                error = %err,
                "stylesheets left unbundled"
            );
            return Ok(html.to_string());
        }
    };

    let bundled: HashSet<String> = references.into_iter().collect();
    let placed = Cell::new(false);
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(r#"link[rel~="stylesheet"][href]"#, |el| {
                let Some(href) = el.get_attribute("href") else {
                    return Ok(());
                };
                if !bundled.contains(&href) || !screen_wide(el.get_attribute("media")) {
                    return Ok(());
                }
                if placed.replace(true) {
                    el.remove();
                } else {
                    el.set_attribute("href", &bundle_url)?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?)
}

fn screen_wide(media: Option<String>) -> bool {
    media.is_none_or(|media| media.trim().eq_ignore_ascii_case("all"))
}

fn performance_hints(html: &str, preconnect: &[String]) -> Result<String, HtmlError> {
    let mut hints = String::from(DEFAULT_HINTS);
    for domain in preconnect {
        let origin = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_matches('/'))
        };
        hints.push_str(&format!(
            r#"<link rel="preconnect" href="{}" crossorigin>"#,
            escape_attribute(&origin)
        ));
    }

    let has_viewport = Rc::new(Cell::new(false));
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!(r#"meta[name="viewport"]"#, {
                    let has_viewport = Rc::clone(&has_viewport);
                    move |_el| {
                        has_viewport.set(true);
                        Ok(())
                    }
                }),
                element!("head", {
                    let has_viewport = Rc::clone(&has_viewport);
                    move |el| {
                        if let Some(handlers) = el.end_tag_handlers() {
                            let has_viewport = Rc::clone(&has_viewport);
                            let hints = hints.clone();
                            let handler: EndTagHandler<'static> =
                                Box::new(move |end: &mut EndTag<'_>| {
                                    let mut injected = String::new();
                                    if !has_viewport.get() {
                                        injected.push_str(VIEWPORT_META);
                                    }
                                    injected.push_str(&hints);
                                    end.before(&injected, ContentType::Html);
                                    Ok(())
                                });
                            handlers.push(handler);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?)
}

fn append_to(html: &str, selector: &str, markup: &str) -> Result<String, HtmlError> {
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |el| {
                el.append(markup, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?)
}

/// WordPress prints enqueued scripts with `id="<handle>-js"`.
fn script_handle(id: Option<String>) -> Option<String> {
    id.and_then(|id| id.strip_suffix("-js").map(str::to_string))
}

fn script_loading(html: &str) -> Result<String, HtmlError> {
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script[src]", |el| {
                if el.has_attribute("async") || el.has_attribute("defer") {
                    return Ok(());
                }
                let handle = script_handle(el.get_attribute("id"));
                let src = el.get_attribute("src").unwrap_or_default();

                let wants_async = handle
                    .as_deref()
                    .is_some_and(|handle| ASYNC_HANDLES.contains(&handle))
                    || ASYNC_SOURCES.iter().any(|marker| src.contains(marker));
                let wants_defer = handle
                    .as_deref()
                    .is_some_and(|handle| DEFER_HANDLES.contains(&handle));

                if wants_async {
                    el.set_attribute("async", "")?;
                } else if wants_defer {
                    el.set_attribute("defer", "")?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?)
}

fn defer_scripts(html: &str, exclude: &[String]) -> Result<String, HtmlError> {
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script[src]", |el| {
                let is_module = el
                    .get_attribute("type")
                    .is_some_and(|kind| kind.eq_ignore_ascii_case("module"));
                let src = el.get_attribute("src").unwrap_or_default();
                if !is_module
                    && !el.has_attribute("async")
                    && !el.has_attribute("defer")
                    && !is_excluded(&src, exclude)
                {
                    el.set_attribute("defer", "")?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?)
}

fn lazy_images(html: &str) -> Result<String, HtmlError> {
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img", |el| {
                if el.has_attribute("data-no-lazy") {
                    return Ok(());
                }
                if el.get_attribute("loading").is_none() {
                    el.set_attribute("loading", "lazy")?;
                }
                if el.get_attribute("decoding").is_none() {
                    el.set_attribute("decoding", "async")?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?)
}

/// Apply `rewrite` to `img[src]`, `img[srcset]` and `source[srcset]` URLs.
fn rewrite_image_urls<F>(html: &str, rewrite: F) -> Result<String, HtmlError>
where
    F: Fn(&str) -> Option<String>,
{
    let rewrite = &rewrite;
    Ok(rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", move |el| {
                    if let Some(src) = el.get_attribute("src")
                        && let Some(next) = rewrite(&src)
                    {
                        el.set_attribute("src", &next)?;
                    }
                    Ok(())
                }),
                element!("img[srcset], source[srcset]", move |el| {
                    if let Some(srcset) = el.get_attribute("srcset")
                        && let Some(next) = rewrite_srcset(&srcset, rewrite)
                    {
                        el.set_attribute("srcset", &next)?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?)
}

/// `None` when no candidate changed.
fn rewrite_srcset(srcset: &str, rewrite: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                Some((url, descriptor)) => (url, Some(descriptor.trim())),
                None => (candidate, None),
            };
            let url = match rewrite(url) {
                Some(next) => {
                    changed = true;
                    next
                }
                None => url.to_string(),
            };
            match descriptor {
                Some(descriptor) => format!("{url} {descriptor}"),
                None => url,
            }
        })
        .collect();
    changed.then(|| candidates.join(", "))
}

/// `url` with a `.jpg`/`.jpeg`/`.png` extension swapped for `.webp`, when that
/// sibling file exists locally.
fn webp_sibling(url: &str, assets: &AssetCache) -> Option<String> {
    let (path_part, suffix) = match url.find(['?', '#']) {
        Some(at) => url.split_at(at),
        None => (url, ""),
    };
    let (stem, extension) = path_part.rsplit_once('.')?;
    if !["jpg", "jpeg", "png"]
        .iter()
        .any(|candidate| extension.eq_ignore_ascii_case(candidate))
    {
        return None;
    }

    let original = assets.resolve_local(path_part)?;
    if !original.path.with_extension("webp").is_file() {
        return None;
    }
    Some(format!("{stem}.webp{suffix}"))
}

fn cdn_url_for(url: &str, site_url: &str, cdn_url: &str) -> Option<String> {
    let site_url = site_url.trim_end_matches('/');
    let cdn_url = cdn_url.trim_end_matches('/');
    if site_url.is_empty() || cdn_url.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(site_url)?;
    (rest.is_empty() || rest.starts_with('/')).then(|| format!("{cdn_url}{rest}"))
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use crate::optimize::minify::RegexMinifier;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        site: SiteContext,
        assets: AssetCache,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let docroot = dir.path().join("public");
            std::fs::create_dir_all(docroot.join("uploads")).unwrap();
            std::fs::create_dir_all(docroot.join("theme")).unwrap();
            std::fs::write(docroot.join("uploads/photo.jpg"), b"jpg").unwrap();
            std::fs::write(docroot.join("uploads/photo.webp"), b"webp").unwrap();
            std::fs::write(docroot.join("uploads/plain.png"), b"png").unwrap();
            std::fs::write(docroot.join("theme/a.css"), "a { color : red; }").unwrap();
            std::fs::write(docroot.join("theme/b.css"), "b { margin : 0; }").unwrap();
            std::fs::write(docroot.join("theme/app.js"), "var a = 1; // x").unwrap();

            let site = SiteContext {
                site_url: "https://example.com".into(),
                document_root: docroot,
                content_url_path: "/wp-content".into(),
            };
            let assets = AssetCache::new(dir.path().join("cache"), site.clone());
            Self {
                _dir: dir,
                site,
                assets,
            }
        }

        fn run(&self, html: &str, stage: Stage) -> String {
            let ctx = DocumentContext {
                site: &self.site,
                assets: &self.assets,
                minifier: &RegexMinifier,
            };
            apply(html, &stage, ctx).unwrap()
        }
    }

    #[test]
    fn lazy_images_keep_explicit_choices() {
        let fixture = Fixture::new();
        let html = r#"<img src="/a.jpg"><img src="/b.jpg" loading="eager"><img src="/c.jpg" data-no-lazy>"#;
        let out = fixture.run(html, Stage::LazyImages);
        assert!(out.contains(r#"<img src="/a.jpg" loading="lazy" decoding="async">"#));
        assert!(out.contains(r#"loading="eager" decoding="async""#));
        assert!(out.contains(r#"<img src="/c.jpg" data-no-lazy>"#));
    }

    #[test]
    fn webp_swaps_only_when_sibling_exists() {
        let fixture = Fixture::new();
        let html = r#"<img src="https://example.com/uploads/photo.jpg?v=2"><img src="/uploads/plain.png"><img src="https://other.net/photo.jpg">"#;
        let out = fixture.run(html, Stage::WebpImages);
        assert!(out.contains(r#"src="https://example.com/uploads/photo.webp?v=2""#));
        assert!(out.contains(r#"src="/uploads/plain.png""#));
        assert!(out.contains(r#"src="https://other.net/photo.jpg""#));
    }

    #[test]
    fn cdn_rewrites_site_images_and_srcsets() {
        let fixture = Fixture::new();
        let html = r#"<picture><source srcset="https://example.com/a.png 1x, https://example.com/a@2x.png 2x"><img src="https://example.com/a.png" srcset="https://elsewhere.io/x.png 1x"></picture><img src="https://example.community/b.png">"#;
        let out = fixture.run(
            html,
            Stage::CdnRewrite {
                cdn_url: "https://cdn.example.net/".into(),
            },
        );
        assert!(out.contains(
            r#"srcset="https://cdn.example.net/a.png 1x, https://cdn.example.net/a@2x.png 2x""#
        ));
        assert!(out.contains(r#"src="https://cdn.example.net/a.png""#));
        assert!(out.contains(r#"srcset="https://elsewhere.io/x.png 1x""#));
        assert!(out.contains(r#"src="https://example.community/b.png""#));
    }

    #[test]
    fn script_loading_uses_handles() {
        let fixture = Fixture::new();
        let html = r#"<script id="jquery-core-js" src="/jquery.js"></script><script id="gtag-js" src="https://www.googletagmanager.com/gtag/js?id=G-1"></script><script src="/theme/app.js"></script>"#;
        let out = fixture.run(html, Stage::ScriptLoading);
        assert!(out.contains(r#"<script id="jquery-core-js" src="/jquery.js" defer"#));
        assert!(out.contains(r#"gtag/js?id=G-1" async"#));
        assert!(out.contains(r#"<script src="/theme/app.js"></script>"#));
    }

    #[test]
    fn defer_respects_exclusions_and_modules() {
        let fixture = Fixture::new();
        let html = r#"<script src="/a.js"></script><script src="/keep/b.js"></script><script type="module" src="/m.js"></script>"#;
        let out = fixture.run(
            html,
            Stage::DeferScripts {
                exclude: vec!["/keep/".into()],
            },
        );
        assert!(out.contains(r#"<script src="/a.js" defer"#));
        assert!(out.contains(r#"<script src="/keep/b.js"></script>"#));
        assert!(out.contains(r#"<script type="module" src="/m.js"></script>"#));
    }

    #[test]
    fn hints_go_before_head_end_without_duplicate_viewport() {
        let fixture = Fixture::new();
        let stage = Stage::PerformanceHints {
            preconnect: vec!["cdn.example.org".into()],
        };

        let html = "<html><head><title>t</title></head><body></body></html>";
        let out = fixture.run(html, stage.clone());
        assert!(out.contains(VIEWPORT_META));
        assert!(out.contains(
            r#"<link rel="preconnect" href="https://cdn.example.org" crossorigin></head>"#
        ));

        let with_viewport = r#"<html><head><meta name="viewport" content="width=400"></head></html>"#;
        let out = fixture.run(with_viewport, stage);
        assert!(!out.contains(VIEWPORT_META));
        assert!(out.contains("fonts.googleapis.com"));
    }

    #[test]
    fn footer_and_heartbeat_injection() {
        let fixture = Fixture::new();
        let html = "<html><head></head><body><p>x</p></body></html>";
        let out = fixture.run(html, Stage::LazyLoadScript);
        assert!(out.contains("IntersectionObserver"));
        assert!(out.ends_with("</script></body></html>"));

        let out = fixture.run(html, Stage::HeartbeatSettings { interval_secs: 120 });
        assert!(out.contains("{interval:120}"));
        assert!(out.contains("</script></head>"));
    }

    #[test]
    fn minify_points_local_assets_at_cached_copies() {
        let fixture = Fixture::new();
        let html = r#"<link rel="stylesheet" href="/theme/a.css?ver=1"><link rel="stylesheet" href="https://fonts.googleapis.com/css"><script src="/theme/app.js"></script>"#;
        let out = fixture.run(
            html,
            Stage::MinifyAssets {
                css: true,
                js: false,
                exclude: Vec::new(),
            },
        );
        assert!(out.contains(r#"href="/wp-content/cache/speed-optimizer/css/"#));
        assert!(out.contains(r#"href="https://fonts.googleapis.com/css""#));
        assert!(out.contains(r#"<script src="/theme/app.js">"#));
    }

    #[test]
    fn concatenation_replaces_local_sheets_with_one_bundle() {
        let fixture = Fixture::new();
        let html = r#"<head><link rel="stylesheet" href="/theme/a.css"><link rel="stylesheet" href="/theme/b.css"><link rel="stylesheet" href="/theme/b.css" media="print"></head>"#;
        let out = fixture.run(
            html,
            Stage::ConcatenateStyles {
                exclude: Vec::new(),
            },
        );
        assert_eq!(out.matches("/cache/speed-optimizer/concat/").count(), 1);
        assert!(!out.contains(r#"href="/theme/a.css""#));
        assert!(out.contains(r#"href="/theme/b.css" media="print""#));
    }
}
