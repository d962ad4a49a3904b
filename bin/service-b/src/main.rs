//! Service B: randomized success and error responses over `hyper`, on a single-threaded event loop.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser;
use roulette_app::prelude::*;
use roulette_core::{ResponseGenerator, ServiceIdentity, SharedRandomSource, Tracer};
use service_b::{HttpServer, RouletteService};
use tokio::net::TcpListener;
use tracing::{error, info};

const APP_NAME: &str = "service-b";

/// Randomized success and error responses, for exercising distributed tracing.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

#[tokio::main(flavor = "current_thread")]
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

    let mut tracer = Tracer::new(identity, config.propagation_style_extract);
    let trace_exporter = if trace_export.enabled {
        let (sink, exporter) = spawn_trace_exporter(&trace_export).error_context("Failed to start trace exporter.")?;
        tracer = tracer.with_sink(sink);
        Some(exporter)
    } else {
        None
    };

    let service = RouletteService::new(ResponseGenerator::new(tracer, SharedRandomSource::default()));
    let result = HttpServer::from_listener(listener, service)
        .serve(shutdown.wait())
        .await;

    // Spans from drained connections are flushed before exiting.
    if let Some(exporter) = trace_exporter {
        exporter.shutdown().await;
    }

    result
}
