//! Service A: randomized success and error responses over `axum`, on a multi-threaded runtime.

#![deny(warnings)]
#![deny(missing_docs)]

use std::net::SocketAddr;

use clap::Parser;
use roulette_app::prelude::*;
use roulette_core::{ResponseGenerator, ServiceIdentity, SharedRandomSource, Tracer};
use service_a::build_router;
use tokio::net::TcpListener;
use tracing::{error, info};

const APP_NAME: &str = "service-a";

/// Randomized success and error responses, for exercising distributed tracing.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = cli
        .bootstrap
        .load_configuration()
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {}", e)));
    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid logging configuration: {:#}", e)));
    let server_config = ServerConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid server configuration: {}", e)));
    let trace_export_config = TraceExportConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid trace export configuration: {}", e)));

    let logging_guard = initialize_logging(&logging_config, APP_NAME)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {}", e)));

    match run(server_config, trace_export_config).await {
        Ok(()) => info!("{} stopped.", APP_NAME),
        Err(e) => {
            error!("{:?}", e);
            drop(logging_guard);
            std::process::exit(1);
        }
    }
}

async fn run(config: ServerConfiguration, trace_export: TraceExportConfiguration) -> Result<(), GenericError> {
    let identity = ServiceIdentity::from_env(APP_NAME, env!("CARGO_PKG_VERSION"));
    info!(
        service = identity.service(),
        env = identity.env(),
        version = identity.version(),
        propagation_style_extract = %config.propagation_style_extract,
        trace_export_enabled = trace_export.enabled,
        "{} starting...",
        APP_NAME
    );

    let shutdown = spawn_signal_handlers().error_context("Failed to configure signal handlers.")?;

    let listener = TcpListener::bind(config.listen_address)
        .await
        .with_error_context(|| format!("Failed to bind to {}.", config.listen_address))?;
    info!("{} started: listening on {}", APP_NAME, config.listen_address);

    let mut tracer = Tracer::new(identity, config.propagation_style_extract);
    let trace_exporter = if trace_export.enabled {
        let (sink, exporter) = spawn_trace_exporter(&trace_export).error_context("Failed to start trace exporter.")?;
        tracer = tracer.with_sink(sink);
        Some(exporter)
    } else {
        None
    };
    let generator = ResponseGenerator::new(tracer, SharedRandomSource::default());

    // In-flight requests are allowed to complete once shutdown is signaled.
    let result = axum::serve(
        listener,
        build_router(generator).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.wait())
    .await
    .error_context("HTTP server failed.");

    if let Some(exporter) = trace_exporter {
        exporter.shutdown().await;
    }

    result
}
