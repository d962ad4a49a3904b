use std::{convert::Infallible, future::Ready, net::SocketAddr};

use bytes::Bytes;
use http::{header::ALLOW, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::service::Service;
use roulette_core::{GeneratedResponse, RequestInfo, ResponseGenerator};

const ROOT_PATH: &str = "/";
const HEALTH_PATH: &str = "/health";
const ALLOWED_METHODS: &str = "GET, HEAD";

/// Routes requests for a single connection to the response generator.
///
/// Cloned once per accepted connection, carrying that connection's peer address.
#[derive(Clone, Debug)]
pub struct RouletteService {
    generator: ResponseGenerator,
    remote_addr: Option<SocketAddr>,
}

impl RouletteService {
    /// Creates a new `RouletteService`.
    pub fn new(generator: ResponseGenerator) -> Self {
        Self {
            generator,
            remote_addr: None,
        }
    }

    /// Returns a copy of this service for a connection from the given peer.
    pub fn for_connection(&self, remote_addr: SocketAddr) -> Self {
        Self {
            generator: self.generator.clone(),
            remote_addr: Some(remote_addr),
        }
    }

    fn route<B>(&self, request: &Request<B>) -> Response<Full<Bytes>> {
        let path = request.uri().path();
        if path != ROOT_PATH && path != HEALTH_PATH {
            return empty_response(StatusCode::NOT_FOUND);
        }

        if request.method() != Method::GET && request.method() != Method::HEAD {
            let mut response = empty_response(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            return response;
        }

        let generated = if path == HEALTH_PATH {
            self.generator.handle_health()
        } else {
            self.generator
                .handle_root(&RequestInfo::from_request(request, self.remote_addr))
        };
        into_response(generated)
    }
}

impl<B> Service<Request<B>> for RouletteService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, request: Request<B>) -> Self::Future {
        std::future::ready(Ok(self.route(&request)))
    }
}

fn into_response(generated: GeneratedResponse) -> Response<Full<Bytes>> {
    generated.into_http_response().map(Full::new)
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use roulette_core::{
        trace::propagation::ExtractionStyles, SequenceRandom, ServiceIdentity, SharedRandomSource, Tracer,
    };

    use super::*;

    fn service() -> RouletteService {
        let tracer = Tracer::new(ServiceIdentity::new("service-b", "test", "0.0.0"), ExtractionStyles::default());
        RouletteService::new(ResponseGenerator::new(
            tracer,
            SharedRandomSource::new(SequenceRandom::new([0.0])),
        ))
    }

    fn request(method: Method, path: &str) -> Request<()> {
        Request::builder().method(method).uri(path).body(()).unwrap()
    }

    #[test]
    fn routing() {
        let service = service();

        assert_eq!(service.route(&request(Method::GET, "/")).status(), StatusCode::OK);
        assert_eq!(service.route(&request(Method::GET, "/?x=1")).status(), StatusCode::OK);
        assert_eq!(service.route(&request(Method::HEAD, "/health")).status(), StatusCode::OK);
        assert_eq!(service.route(&request(Method::GET, "/nope")).status(), StatusCode::NOT_FOUND);
        assert_eq!(service.route(&request(Method::POST, "/nope")).status(), StatusCode::NOT_FOUND);

        let response = service.route(&request(Method::POST, "/"));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), ALLOWED_METHODS);
    }

    #[test]
    fn connection_copies_keep_generator() {
        let service = service();
        let addr: SocketAddr = "192.0.2.10:5000".parse().unwrap();

        let per_connection = service.for_connection(addr);
        assert_eq!(per_connection.remote_addr, Some(addr));
        assert_eq!(service.remote_addr, None);
        assert_eq!(per_connection.route(&request(Method::GET, "/")).status(), StatusCode::OK);
    }
}
