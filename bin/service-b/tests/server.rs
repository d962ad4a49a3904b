use std::{net::SocketAddr, time::Duration};

use roulette_app::signals::ShutdownSignal;
use roulette_core::{
    response::ResponseBody, trace::propagation::ExtractionStyles, ResponseGenerator, SequenceRandom, ServiceIdentity,
    SharedRandomSource, Tracer,
};
use service_b::{HttpServer, RouletteService};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

async fn start_server(draws: Vec<f64>) -> RunningServer {
    let tracer = Tracer::new(ServiceIdentity::new("service-b", "test", "0.0.0"), ExtractionStyles::default());
    let service = RouletteService::new(ResponseGenerator::new(
        tracer,
        SharedRandomSource::new(SequenceRandom::new(draws)),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = HttpServer::from_listener(listener, service);
    let addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown) = ShutdownSignal::manual();
    let handle = tokio::spawn(async move { server.serve(shutdown.wait()).await.unwrap() });

    RunningServer {
        addr,
        shutdown_tx,
        handle,
    }
}

/// Sends a single request over a fresh connection and returns the raw response.
async fn send(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn get(path: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path)
}

fn split(response: &str) -> (&str, &str) {
    response.split_once("\r\n\r\n").unwrap()
}

#[tokio::test]
async fn serves_over_tcp() {
    let server = start_server(vec![0.6, 0.0]).await;

    let response = send(server.addr, &get("/")).await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request"), "unexpected response: {}", response);
    assert!(head.to_lowercase().contains("content-type: application/json"));
    assert!(matches!(serde_json::from_str::<ResponseBody>(body).unwrap(), ResponseBody::Error(_)));

    let response = send(server.addr, &get("/health")).await;
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(body.contains("\"status\":\"healthy\""));

    let response = send(server.addr, &get("/missing")).await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));

    server.shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let server = start_server(vec![0.0]).await;

    // A keep-alive connection that has finished its request, left open.
    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    idle.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0u8; 1024];
    let read = idle.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..read]).starts_with("HTTP/1.1 200 OK"));

    server.shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();

    // The server closed its side and stopped accepting new connections.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), idle.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(server.addr).await.is_err());
}
