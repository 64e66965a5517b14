use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use docvl_pipeline::{LogFormat, LoggingConfig, OcrService, ServiceConfig};

mod api;
mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    init_tracing(&config.logging);

    tracing::info!("docvl v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve { eager, .. } => {
            serve(config, eager).await?;
        }
        Command::Process { input, format } => {
            let service = OcrService::from_config(&config.pipeline);
            cli::process_file(&service, &input, format)?;
        }
        Command::Batch {
            input_dir,
            output_dir,
            format,
        } => {
            tracing::info!(
                input = %input_dir.display(),
                output = %output_dir.display(),
                "batch processing"
            );
            let service = OcrService::from_config(&config.pipeline);
            let (ok, failed) = cli::process_dir(&service, &input_dir, &output_dir, format)?;
            tracing::info!(ok, failed, "batch finished");
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn serve(config: ServiceConfig, eager: bool) -> anyhow::Result<()> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let service = OcrService::from_config(&config.pipeline);
    let state = Arc::new(api::AppState::new(
        service,
        config.app.clone(),
        Some(metrics_handle),
    ));

    if eager {
        let warm = state.clone();
        tokio::task::spawn_blocking(move || warm.service.ensure_ready()).await??;
    }

    let app = api::create_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    tracing::info!(%addr, prefix = %config.app.api_prefix, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received");
}
