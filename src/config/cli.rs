use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the speed-optimizer binary.
#[derive(Debug, Parser)]
#[command(
    name = "speed-optimizer",
    version,
    about = "Page cache and optimization front for a site"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SPEED_OPTIMIZER_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub site: SiteOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP front.
    Serve(Box<ServeArgs>),
    /// Page cache maintenance.
    Cache(CacheArgs),
    /// License activation and status.
    License(LicenseArgs),
    /// Settings export, import and defaults.
    Settings(SettingsArgs),
}

/// Overrides that apply to every command.
#[derive(Debug, Args, Default, Clone)]
pub struct SiteOverrides {
    /// Override the content directory holding the cache tree.
    #[arg(long = "content-dir", global = true, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub content_dir: Option<PathBuf>,

    /// Override the options file.
    #[arg(long = "options-file", global = true, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub options_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the public site URL.
    #[arg(long = "site-url", value_name = "URL")]
    pub site_url: Option<String>,

    /// Forward page generation to this origin instead of serving files.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the document root static pages and assets are read from.
    #[arg(long = "document-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub document_root: Option<PathBuf>,

    /// Override the admin bearer token.
    #[arg(long = "admin-token", env = "SPEED_OPTIMIZER_ADMIN_TOKEN", value_name = "TOKEN")]
    pub admin_token: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Delete every cached page and asset.
    Clear,
    /// Print the number and size of cached pages.
    Stats,
    /// Request paths through the optimizer so they are cached.
    Preload(PreloadArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PreloadArgs {
    /// Paths to preload; the configured preload paths when empty.
    #[arg(value_name = "PATH")]
    pub paths: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct LicenseArgs {
    #[command(subcommand)]
    pub command: LicenseCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LicenseCommand {
    /// Show the stored license and the tier in effect.
    Status,
    /// Activate a license key.
    Activate(ActivateArgs),
    /// Remove the stored license.
    Deactivate,
    /// Re-validate the stored license with the authority.
    Check,
}

#[derive(Debug, Args, Clone)]
pub struct ActivateArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SettingsCommand {
    /// Write the current settings to a JSON file.
    Export(FileArgs),
    /// Replace settings from a JSON export.
    Import(FileArgs),
    /// Store defaults for every setting not yet present.
    Defaults,
}

#[derive(Debug, Args, Clone)]
pub struct FileArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}
