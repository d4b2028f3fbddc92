use std::process;

use tacky::{
    application::error::AppError,
    cache::{CacheConfig, ResponseCache, StoreCatalog},
    config,
    infra::{
        error::InfraError,
        http::{self, DemoSource},
        telemetry,
        upstream::Upstream,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig => run_check_config(&settings),
    }
}

fn register_cache(settings: &config::Settings) -> Result<ResponseCache, AppError> {
    let catalog = StoreCatalog::from(&settings.cache);
    let cache = ResponseCache::register(&CacheConfig::from(&settings.cache), &catalog)?;
    Ok(cache)
}

fn run_check_config(settings: &config::Settings) -> Result<(), AppError> {
    register_cache(settings)?;
    info!(
        addr = %settings.server.addr,
        stores = settings.cache.stores.len(),
        upstream = settings.demo.upstream_url.as_deref().unwrap_or(""),
        "configuration is valid"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = register_cache(&settings)?;

    let upstream = settings
        .demo
        .upstream_url
        .as_deref()
        .map(|url| Upstream::new(url, settings.demo.upstream_timeout))
        .transpose()?;
    let router = http::build_router(&cache, DemoSource::new(upstream))?;

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "tacky listening");

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| InfraError::server(err.to_string()));

    let pending = cache.tails().pending();
    if !cache
        .tails()
        .drain_within(settings.server.graceful_shutdown)
        .await
    {
        warn!(pending, "deferred cache writes were still running at exit");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
