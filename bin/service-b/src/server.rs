use std::{future::Future, io, net::SocketAddr, time::Duration};

use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use roulette_app::{backoff::ExponentialBackoff, prelude::*};
use tokio::{net::TcpListener, select, sync::watch, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{listener::Listener, service::RouletteService};

const ACCEPT_MIN_BACKOFF: Duration = Duration::from_millis(10);
const ACCEPT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP/1.1 server that runs one task per connection.
///
/// When shutdown is triggered, the server stops accepting connections, asks every open connection to finish its
/// in-flight request and close, and then waits for all of them.
///
/// Failing to accept a connection, such as when the process runs out of file descriptors, does not stop the server:
/// accepting is retried after an exponentially increasing delay, which resets after the next successful accept.
pub struct HttpServer<L = TcpListener> {
    listener: L,
    conn_builder: http1::Builder,
    accept_backoff: ExponentialBackoff,
    service: RouletteService,
}

impl<L: Listener> HttpServer<L> {
    /// Creates a new `HttpServer` from the given listener and service.
    pub fn from_listener(listener: L, service: RouletteService) -> Self {
        let mut conn_builder = http1::Builder::new();
        conn_builder.timer(TokioTimer::new());

        Self {
            listener,
            conn_builder,
            accept_backoff: ExponentialBackoff::new(ACCEPT_MIN_BACKOFF, ACCEPT_MAX_BACKOFF),
            service,
        }
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` completes, then drains in-flight connections.
    ///
    /// # Errors
    ///
    /// If the listen address cannot be determined, an error is returned.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), GenericError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut listener,
            conn_builder,
            accept_backoff,
            service,
        } = self;

        let listen_addr = listener.local_addr().error_context("Failed to get listen address.")?;
        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();
        let mut accept_errors = 0u32;
        tokio::pin!(shutdown);

        info!(%listen_addr, "HTTP server started.");

        loop {
            select! {
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        accept_errors = 0;

                        let service = service.for_connection(remote_addr);
                        let conn_builder = conn_builder.clone();
                        let mut drain_rx = drain_rx.clone();

                        connections.spawn(async move {
                            let conn = conn_builder.serve_connection(TokioIo::new(stream), service);
                            tokio::pin!(conn);

                            let result = select! {
                                result = conn.as_mut() => result,
                                _ = drain_rx.changed() => {
                                    conn.as_mut().graceful_shutdown();
                                    conn.await
                                }
                            };

                            if let Err(e) = result {
                                debug!(%remote_addr, error = %e, "Failed to serve HTTP connection.");
                            }
                        });
                    }
                    Err(e) => {
                        let retry_in = accept_backoff.get_backoff_duration(accept_errors);
                        accept_errors = accept_errors.saturating_add(1);
                        warn!(
                            %listen_addr,
                            error = %e,
                            consecutive_errors = accept_errors,
                            retry_in_ms = retry_in.as_millis() as u64,
                            "Failed to accept connection."
                        );

                        select! {
                            _ = tokio::time::sleep(retry_in) => {}
                            _ = &mut shutdown => {
                                debug!(%listen_addr, "Received shutdown signal.");
                                break;
                            }
                        }
                    }
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                _ = &mut shutdown => {
                    debug!(%listen_addr, "Received shutdown signal.");
                    break;
                }
            }
        }

        drop(listener);

        // Receivers are held by every connection task, and by `drain_rx` until the end of this function.
        drain_tx.send_replace(());

        if !connections.is_empty() {
            info!(in_flight = connections.len(), "Waiting for open connections to finish.");
        }
        while connections.join_next().await.is_some() {}

        info!(%listen_addr, "HTTP server stopped.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use roulette_core::{
        trace::propagation::ExtractionStyles, ResponseGenerator, SequenceRandom, ServiceIdentity, SharedRandomSource,
        Tracer,
    };
    use tokio::net::TcpStream;

    use super::*;

    /// A listener that behaves like one whose process has run out of file descriptors.
    struct ExhaustedListener {
        attempts: Arc<AtomicUsize>,
    }

    impl Listener for ExhaustedListener {
        type Stream = TcpStream;

        fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            std::future::ready(Err(io::Error::other("too many open files")))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 8080)))
        }
    }

    fn service() -> RouletteService {
        let tracer = Tracer::new(ServiceIdentity::new("service-b", "test", "0.0.0"), ExtractionStyles::default());
        RouletteService::new(ResponseGenerator::new(
            tracer,
            SharedRandomSource::new(SequenceRandom::new([0.0])),
        ))
    }

    #[tokio::test]
    async fn accept_errors_back_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let listener = ExhaustedListener {
            attempts: Arc::clone(&attempts),
        };

        HttpServer::from_listener(listener, service())
            .serve(tokio::time::sleep(Duration::from_millis(500)))
            .await
            .unwrap();

        // Backing off from 10ms and doubling leaves room for about six attempts in 500ms. Retrying immediately would
        // make millions.
        let attempts = attempts.load(Ordering::Relaxed);
        assert!(attempts >= 2, "accept was only attempted {} times", attempts);
        assert!(attempts < 20, "accept was attempted {} times", attempts);
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let listener = ExhaustedListener {
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let mut server = HttpServer::from_listener(listener, service());
        server.accept_backoff = ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(60));

        tokio::time::timeout(
            Duration::from_secs(5),
            server.serve(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
