use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use roulette_core::{GeneratedResponse, RequestInfo, ResponseGenerator};

/// Handles `GET /` with a randomized outcome.
pub async fn handle_root(State(generator): State<ResponseGenerator>, request: Request) -> Response {
    let info = RequestInfo::from_request(&request, remote_addr(&request));
    into_response(generator.handle_root(&info))
}

/// Handles `GET /health`.
pub async fn handle_health(State(generator): State<ResponseGenerator>) -> Response {
    into_response(generator.handle_health())
}

// Absent when the router is driven without a listener, e.g. in tests.
fn remote_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn into_response(generated: GeneratedResponse) -> Response {
    generated.into_http_response().map(Body::from)
}
