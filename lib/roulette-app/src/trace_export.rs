//! Export of finished spans to the Datadog Agent.

use std::{
    env,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use http::{header::CONTENT_TYPE, Request, Uri};
use http_body_util::{BodyExt as _, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use roulette_core::trace::{
    agent::{TracePayload, AGENT_TRACES_PATH, DEFAULT_AGENT_PORT},
    FinishedSpan, SpanSink,
};
use serde::Deserialize;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigurationError, GenericConfiguration},
    error::{ErrorContext as _, GenericError},
    generic_error,
};

const DEFAULT_AGENT_HOST: &str = "localhost";
const TRACE_COUNT_HEADER: &str = "x-datadog-trace-count";
const META_LANG_HEADER: &str = "datadog-meta-lang";
const META_TRACER_VERSION_HEADER: &str = "datadog-meta-tracer-version";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const fn default_flush_interval_ms() -> u64 {
    1000
}

const fn default_buffer_size() -> usize {
    4096
}

const fn default_batch_size() -> usize {
    256
}

/// Trace export configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TraceExportConfiguration {
    /// Whether finished spans are sent to the Datadog Agent.
    ///
    /// Defaults to `false`.
    #[serde(default, rename = "trace_export_enabled")]
    pub enabled: bool,

    /// Base URL of the Agent's trace intake, such as `http://datadog-agent:8126`.
    ///
    /// When empty, the URL is built from `DD_AGENT_HOST` and `DD_TRACE_AGENT_PORT`, which default to `localhost` and
    /// `8126`.
    #[serde(default, rename = "trace_agent_url")]
    pub agent_url: String,

    /// How often buffered spans are flushed, in milliseconds.
    ///
    /// Defaults to 1000.
    #[serde(default = "default_flush_interval_ms", rename = "trace_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum number of finished spans waiting to be flushed. Spans finished while the buffer is full are dropped.
    ///
    /// Defaults to 4096.
    #[serde(default = "default_buffer_size", rename = "trace_buffer_size")]
    pub buffer_size: usize,

    /// Number of spans that triggers a flush before the flush interval elapses.
    ///
    /// Defaults to 256.
    #[serde(default = "default_batch_size", rename = "trace_batch_size")]
    pub batch_size: usize,
}

impl TraceExportConfiguration {
    /// Creates a new `TraceExportConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `TraceExportConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Returns the full URL of the Agent's trace intake endpoint.
    ///
    /// # Errors
    ///
    /// If the resulting URL is invalid, an error is returned.
    pub fn traces_uri(&self) -> Result<Uri, GenericError> {
        let base = if self.agent_url.is_empty() {
            agent_url_from_parts(env::var("DD_AGENT_HOST").ok(), env::var("DD_TRACE_AGENT_PORT").ok())
        } else {
            self.agent_url.clone()
        };

        let uri = format!("{}{}", base.trim_end_matches('/'), AGENT_TRACES_PATH);
        uri.parse::<Uri>()
            .with_error_context(|| format!("Invalid trace agent URL '{}'.", base))
    }
}

fn agent_url_from_parts(host: Option<String>, port: Option<String>) -> String {
    let host = host
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_AGENT_HOST.to_string());
    let port = port
        .filter(|port| !port.is_empty())
        .unwrap_or_else(|| DEFAULT_AGENT_PORT.to_string());

    // IPv6 literals need brackets in a URL.
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// A [`SpanSink`] that buffers spans for the background exporter.
///
/// Submitting never blocks: when the buffer is full, or the exporter has stopped, the span is dropped and counted.
#[derive(Debug)]
pub struct AgentSpanSink {
    tx: mpsc::Sender<FinishedSpan>,
    dropped: Arc<AtomicU64>,
}

impl AgentSpanSink {
    fn new(tx: mpsc::Sender<FinishedSpan>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the number of spans dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SpanSink for AgentSpanSink {
    fn submit(&self, span: &FinishedSpan) {
        if self.tx.try_send(span.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Handle to the background trace exporter.
#[must_use]
pub struct TraceExporterHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TraceExporterHandle {
    /// Stops the exporter, flushing any buffered spans first.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Trace exporter already stopped.");
        }

        if let Err(e) = self.task.await {
            warn!(error = %e, "Trace exporter task failed.");
        }
    }
}

/// Spawns the background trace exporter.
///
/// Returns the sink to install on the tracer, and a handle to stop the exporter. Spans are sent in batches, either
/// when enough of them are buffered or when the flush interval elapses. Failed sends are logged and the spans are
/// dropped.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// If the Agent URL is invalid, an error is returned.
pub fn spawn_trace_exporter(
    config: &TraceExportConfiguration,
) -> Result<(Arc<AgentSpanSink>, TraceExporterHandle), GenericError> {
    if config.buffer_size == 0 {
        return Err(generic_error!("Trace buffer size must be greater than zero."));
    }

    let client = AgentClient::new(config.traces_uri()?);
    let (tx, rx) = mpsc::channel(config.buffer_size);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let sink = Arc::new(AgentSpanSink::new(tx));
    let exporter = Exporter {
        client,
        flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        batch_size: config.batch_size.max(1),
        dropped: Arc::clone(&sink.dropped),
    };

    info!(agent_url = %exporter.client.traces_uri, "Trace exporter started.");
    let task = tokio::spawn(exporter.run(rx, shutdown_rx));

    Ok((sink, TraceExporterHandle { shutdown_tx, task }))
}

struct AgentClient {
    client: Client<HttpConnector, Full<Bytes>>,
    traces_uri: Uri,
}

impl AgentClient {
    fn new(traces_uri: Uri) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            traces_uri,
        }
    }

    async fn send(&self, payload: TracePayload) -> Result<(), GenericError> {
        let request = Request::post(self.traces_uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(TRACE_COUNT_HEADER, payload.trace_count())
            .header(META_LANG_HEADER, "rust")
            .header(META_TRACER_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
            .body(Full::new(Bytes::from(payload.into_body())))
            .error_context("Failed to build trace payload request.")?;

        let response = timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .error_context("Timed out sending traces to the agent.")?
            .error_context("Failed to send traces to the agent.")?;

        let status = response.status();
        response
            .into_body()
            .collect()
            .await
            .error_context("Failed to read trace agent response.")?;

        if !status.is_success() {
            return Err(generic_error!("Trace agent responded with status {}.", status));
        }

        Ok(())
    }
}

struct Exporter {
    client: AgentClient,
    flush_interval: Duration,
    batch_size: usize,
    dropped: Arc<AtomicU64>,
}

impl Exporter {
    async fn run(self, mut rx: mpsc::Receiver<FinishedSpan>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut flush_timer = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                maybe_span = rx.recv() => match maybe_span {
                    Some(span) => {
                        batch.push(span);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = flush_timer.tick() => self.flush(&mut batch).await,
                _ = &mut shutdown_rx => {
                    debug!("Trace exporter received shutdown signal.");
                    break;
                }
            }
        }

        // Drain whatever was submitted before the channel closed.
        rx.close();
        while let Some(span) = rx.recv().await {
            batch.push(span);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        self.flush(&mut batch).await;

        info!(dropped_spans = self.dropped.load(Ordering::Relaxed), "Trace exporter stopped.");
    }

    async fn flush(&self, batch: &mut Vec<FinishedSpan>) {
        if batch.is_empty() {
            return;
        }

        let spans = std::mem::take(batch);
        let payload = match TracePayload::encode(&spans) {
            Ok(payload) => payload,
            Err(e) => {
                self.dropped.fetch_add(spans.len() as u64, Ordering::Relaxed);
                warn!(error = %e, spans = spans.len(), "Failed to encode traces. Dropping.");
                return;
            }
        };

        let trace_count = payload.trace_count();
        match self.client.send(payload).await {
            Ok(()) => debug!(traces = trace_count, spans = spans.len(), "Flushed traces to the agent."),
            Err(e) => {
                self.dropped.fetch_add(spans.len() as u64, Ordering::Relaxed);
                warn!(error = format_args!("{:#}", e), spans = spans.len(), "Failed to flush traces. Dropping.");
            }
        }
    }
}
