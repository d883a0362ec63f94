use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use speed_optimizer::{
    application::{
        error::AppError,
        license::{Actor, LicenseService, OfflineAuthority},
        operations::SiteOperations,
        options::OptionsStore,
        wiring::Behavior,
    },
    cache::{CacheConfig, PageCacheEngine, Preloader},
    config,
    infra::{
        error::InfraError,
        generator::{OriginGenerator, PageGenerator, StaticGenerator},
        http::{self, AdminState, HttpState},
        options::FileOptionsStore,
        telemetry,
    },
    optimize::{Optimizer, SiteContext},
};
use time::OffsetDateTime;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CLI_ACTOR: &str = "cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let operations = build_operations(&settings);

    match command {
        config::Command::Serve(_) => run_serve(settings, operations).await,
        config::Command::Cache(args) => run_cache(settings, operations, args.command).await,
        config::Command::License(args) => run_license(operations, args.command).await,
        config::Command::Settings(args) => run_settings(operations, args.command).await,
    }
}

fn build_operations(settings: &config::Settings) -> SiteOperations {
    let store: Arc<dyn OptionsStore> =
        Arc::new(FileOptionsStore::new(&settings.site.options_file));
    let license = LicenseService::new(Arc::clone(&store), Arc::new(OfflineAuthority));
    let engine = PageCacheEngine::new(CacheConfig::from(settings));
    SiteOperations::new(store, license, engine)
}

fn build_http_state(
    settings: &config::Settings,
    operations: SiteOperations,
) -> Result<HttpState, AppError> {
    let generator: Arc<dyn PageGenerator> = match &settings.site.origin_url {
        Some(origin) => Arc::new(
            OriginGenerator::new(origin.clone(), settings.site.origin_timeout)
                .map_err(|err| AppError::from(InfraError::origin(err.to_string())))?,
        ),
        None => Arc::new(StaticGenerator::new(&settings.site.document_root)),
    };
    let optimizer = Optimizer::new(
        SiteContext::from(settings),
        operations.engine().config().root.clone(),
    );

    Ok(HttpState {
        operations,
        generator,
        optimizer,
        admin_path_prefixes: settings.site.admin_path_prefixes.clone().into(),
    })
}

async fn run_serve(settings: config::Settings, operations: SiteOperations) -> Result<(), AppError> {
    let written = operations.activate_defaults().await?;
    if written > 0 {
        info!(target = "speed_optimizer::serve", written, "default options stored");
    }

    let state = build_http_state(&settings, operations.clone())?;
    let admin = match &settings.admin.token {
        Some(token) => Some(AdminState::new(operations.clone(), token.as_str())),
        None => {
            info!(
                target = "speed_optimizer::serve",
                "no admin token configured; admin API disabled"
            );
            None
        }
    };

    let preload_handle = spawn_preloader(
        operations.clone(),
        Preloader::new(http::build_site_router(state.clone())),
        settings.cache.preload_paths.clone(),
        settings.cache.preload_interval,
    );
    let license_handle =
        spawn_license_refresh(operations.license().clone(), settings.license.revalidate_interval);

    let result = serve_http(&settings, http::build_router(state, admin)).await;

    for handle in [preload_handle, license_handle] {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn serve_http(settings: &config::Settings, router: axum::Router) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "speed_optimizer::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(
                    target = "speed_optimizer::serve",
                    error = %err,
                    "failed to listen for shutdown signal"
                );
                std::future::pending::<()>().await;
            }
            info!(target = "speed_optimizer::serve", "shutting down");
            let _ = stop_tx.send(true);
        },
    );

    let server = server.into_future();
    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        () = deadline => {
            warn!(
                target = "speed_optimizer::serve",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish in time"
            );
            Ok(())
        }
    }
}

/// Warms the configured paths on every tick while the preloading behavior
/// is wired. The first tick fires at startup.
fn spawn_preloader(
    operations: SiteOperations,
    preloader: Preloader,
    paths: Vec<String>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let wiring = operations.wiring_at(OffsetDateTime::now_utc()).await;
            if !wiring.is_active(Behavior::CachePreloading) {
                continue;
            }
            preloader.run(&paths).await;
        }
    })
}

fn spawn_license_refresh(license: LicenseService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            if let Err(err) = license.refresh().await {
                warn!(
                    target = "speed_optimizer::license",
                    error = %err,
                    "license revalidation failed"
                );
            }
        }
    })
}

async fn run_cache(
    settings: config::Settings,
    operations: SiteOperations,
    command: config::CacheCommand,
) -> Result<(), AppError> {
    match command {
        config::CacheCommand::Clear => {
            operations.clear_cache().await?;
            info!(target = "speed_optimizer::cache", "cache cleared");
        }
        config::CacheCommand::Stats => {
            print_json(&operations.cache_stats().await?)?;
        }
        config::CacheCommand::Preload(args) => {
            let paths = if args.paths.is_empty() {
                settings.cache.preload_paths.clone()
            } else {
                args.paths
            };
            let state = build_http_state(&settings, operations)?;
            let report = Preloader::new(http::build_site_router(state))
                .run(&paths)
                .await;
            print_json(&report)?;
            if !report.failed.is_empty() {
                return Err(AppError::unexpected(format!(
                    "{} of {} paths failed to preload",
                    report.failed.len(),
                    report.total()
                )));
            }
        }
    }
    Ok(())
}

async fn run_license(
    operations: SiteOperations,
    command: config::LicenseCommand,
) -> Result<(), AppError> {
    let license = operations.license();
    let actor = Actor::manager(CLI_ACTOR);
    let info = match command {
        config::LicenseCommand::Status => {
            license
                .resolver()
                .info_at(OffsetDateTime::now_utc())
                .await
        }
        config::LicenseCommand::Activate(args) => license.activate(&actor, &args.key).await?,
        config::LicenseCommand::Deactivate => license.deactivate(&actor).await?,
        config::LicenseCommand::Check => license.refresh().await?,
    };
    print_json(&info)
}

async fn run_settings(
    operations: SiteOperations,
    command: config::SettingsCommand,
) -> Result<(), AppError> {
    match command {
        config::SettingsCommand::Export(args) => {
            let document = operations
                .export_settings(OffsetDateTime::now_utc())
                .await?;
            tokio::fs::write(&args.file, document)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            info!(
                target = "speed_optimizer::options",
                path = %args.file.display(),
                "settings exported"
            );
        }
        config::SettingsCommand::Import(args) => {
            let document = tokio::fs::read_to_string(&args.file)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            let imported = operations.import_settings(&document).await?;
            info!(
                target = "speed_optimizer::options",
                path = %args.file.display(),
                imported,
                "settings imported"
            );
        }
        config::SettingsCommand::Defaults => {
            let written = operations.activate_defaults().await?;
            info!(target = "speed_optimizer::options", written, "default options stored");
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
