//! Configuration layer: typed settings with layered precedence (file → env → CLI).
//!
//! Deployment settings only. Optimization toggles live in the options store
//! and are read per request.

mod cli;
#[cfg(test)]
mod tests;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    DEFAULT_LOGGED_IN_COOKIES, DEFAULT_MIN_CAPTURE_BYTES, DEFAULT_PRELOAD_INTERVAL_SECS,
    DEFAULT_SESSION_COOKIES,
};

pub use cli::{
    ActivateArgs, CacheArgs, CacheCommand, CliArgs, Command, FileArgs, LicenseArgs,
    LicenseCommand, PreloadArgs, ServeArgs, ServeOverrides, SettingsArgs, SettingsCommand,
    SiteOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "speed-optimizer";
const ENV_PREFIX: &str = "SPEED_OPTIMIZER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_DIR: &str = "wp-content";
const DEFAULT_DOCUMENT_ROOT: &str = ".";
const DEFAULT_SITE_URL: &str = "http://localhost:8080";
const DEFAULT_CONTENT_URL_PATH: &str = "/wp-content";
const DEFAULT_OPTIONS_FILE: &str = "speed-optimizer-options.json";
const DEFAULT_ADMIN_PATH_PREFIXES: [&str; 2] = ["/wp-admin", "/wp-login.php"];
const DEFAULT_PRELOAD_PATHS: [&str; 1] = ["/"];
const DEFAULT_LICENSE_REVALIDATE_SECS: u64 = 86_400;
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;
const MIN_ADMIN_TOKEN_LEN: usize = 16;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub cache: CacheSettings,
    pub admin: AdminSettings,
    pub license: LicenseSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// The `wp-content` equivalent; the cache tree lives below it.
    pub content_dir: PathBuf,
    pub document_root: PathBuf,
    pub site_url: Url,
    /// URL path `content_dir` is served under.
    pub content_url_path: String,
    pub origin_url: Option<Url>,
    pub origin_timeout: Duration,
    pub options_file: PathBuf,
    pub admin_path_prefixes: Vec<String>,
}

impl SiteSettings {
    /// `site_url` without its trailing slash, as pages spell it.
    pub fn site_base(&self) -> String {
        self.site_url.as_str().trim_end_matches('/').to_string()
    }

    pub fn is_admin_path(&self, path: &str) -> bool {
        self.admin_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub min_capture_bytes: usize,
    pub logged_in_cookies: Vec<String>,
    pub session_cookies: Vec<String>,
    pub preload_paths: Vec<String>,
    pub preload_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    /// Bearer token for the admin routes; the routes are not mounted without one.
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LicenseSettings {
    pub revalidate_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("site.admin_path_prefixes")
            .with_list_parse_key("cache.logged_in_cookies")
            .with_list_parse_key("cache.session_cookies")
            .with_list_parse_key("cache.preload_paths"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_site_overrides(&cli.site);
    if let Some(Command::Serve(args)) = cli.command.as_ref() {
        raw.apply_serve_overrides(&args.overrides);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    cache: RawCacheSettings,
    admin: RawAdminSettings,
    license: RawLicenseSettings,
}

impl RawSettings {
    fn apply_site_overrides(&mut self, overrides: &SiteOverrides) {
        if let Some(dir) = overrides.content_dir.as_ref() {
            self.site.content_dir = Some(dir.clone());
        }
        if let Some(file) = overrides.options_file.as_ref() {
            self.site.options_file = Some(file.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(url) = overrides.site_url.as_ref() {
            self.site.site_url = Some(url.clone());
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.site.origin_url = Some(url.clone());
        }
        if let Some(root) = overrides.document_root.as_ref() {
            self.site.document_root = Some(root.clone());
        }
        if let Some(token) = overrides.admin_token.as_ref() {
            self.admin.token = Some(token.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            cache,
            admin,
            license,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            site: build_site_settings(site)?,
            cache: build_cache_settings(cache)?,
            admin: build_admin_settings(admin)?,
            license: build_license_settings(license)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let content_dir = non_empty_path(site.content_dir, DEFAULT_CONTENT_DIR, "site.content_dir")?;
    let document_root = non_empty_path(
        site.document_root,
        DEFAULT_DOCUMENT_ROOT,
        "site.document_root",
    )?;
    let options_file = non_empty_path(
        site.options_file,
        DEFAULT_OPTIONS_FILE,
        "site.options_file",
    )?;

    let site_url = parse_http_url(
        site.site_url.as_deref().unwrap_or(DEFAULT_SITE_URL),
        "site.site_url",
    )?;

    let origin_url = match site.origin_url.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_http_url(raw, "site.origin_url")?),
        _ => None,
    };
    let origin_timeout = positive_secs(
        site.origin_timeout_seconds
            .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS),
        "site.origin_timeout_seconds",
    )?;

    let content_url_path = site
        .content_url_path
        .unwrap_or_else(|| DEFAULT_CONTENT_URL_PATH.to_string());
    if !content_url_path.starts_with('/') {
        return Err(LoadError::invalid(
            "site.content_url_path",
            "must start with `/`",
        ));
    }
    let content_url_path = content_url_path.trim_end_matches('/').to_string();

    let admin_path_prefixes = list_or_default(site.admin_path_prefixes, &DEFAULT_ADMIN_PATH_PREFIXES);
    if let Some(bad) = admin_path_prefixes
        .iter()
        .find(|prefix| !prefix.starts_with('/'))
    {
        return Err(LoadError::invalid(
            "site.admin_path_prefixes",
            format!("`{bad}` must start with `/`"),
        ));
    }

    Ok(SiteSettings {
        content_dir,
        document_root,
        site_url,
        content_url_path,
        origin_url,
        origin_timeout,
        options_file,
        admin_path_prefixes,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let min_capture_bytes = cache
        .min_capture_bytes
        .unwrap_or(DEFAULT_MIN_CAPTURE_BYTES as u64);
    let min_capture_bytes = usize::try_from(min_capture_bytes).map_err(|_| {
        LoadError::invalid(
            "cache.min_capture_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let preload_interval = positive_secs(
        cache
            .preload_interval_seconds
            .unwrap_or(DEFAULT_PRELOAD_INTERVAL_SECS),
        "cache.preload_interval_seconds",
    )?;

    Ok(CacheSettings {
        min_capture_bytes,
        logged_in_cookies: list_or_default(cache.logged_in_cookies, &DEFAULT_LOGGED_IN_COOKIES),
        session_cookies: list_or_default(cache.session_cookies, &DEFAULT_SESSION_COOKIES),
        preload_paths: list_or_default(cache.preload_paths, &DEFAULT_PRELOAD_PATHS),
        preload_interval,
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> Result<AdminSettings, LoadError> {
    let token = admin.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if let Some(token) = token.as_ref()
        && token.len() < MIN_ADMIN_TOKEN_LEN
    {
        return Err(LoadError::invalid(
            "admin.token",
            format!("must be at least {MIN_ADMIN_TOKEN_LEN} characters"),
        ));
    }
    Ok(AdminSettings { token })
}

fn build_license_settings(license: RawLicenseSettings) -> Result<LicenseSettings, LoadError> {
    let revalidate_interval = positive_secs(
        license
            .revalidate_interval_seconds
            .unwrap_or(DEFAULT_LICENSE_REVALIDATE_SECS),
        "license.revalidate_interval_seconds",
    )?;
    Ok(LicenseSettings {
        revalidate_interval,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    content_dir: Option<PathBuf>,
    document_root: Option<PathBuf>,
    site_url: Option<String>,
    content_url_path: Option<String>,
    origin_url: Option<String>,
    origin_timeout_seconds: Option<u64>,
    options_file: Option<PathBuf>,
    admin_path_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    min_capture_bytes: Option<u64>,
    logged_in_cookies: Option<Vec<String>>,
    session_cookies: Option<Vec<String>>,
    preload_paths: Option<Vec<String>>,
    preload_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLicenseSettings {
    revalidate_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(raw: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{raw}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

/// Trimmed, non-empty entries of `value`, or `default` when none were configured.
fn list_or_default(value: Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    match value {
        Some(entries) => entries
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect(),
        None => default.iter().map(|entry| entry.to_string()).collect(),
    }
}
