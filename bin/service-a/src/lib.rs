//! Service A: the response generator served through an `axum` router.

#![deny(warnings)]
#![deny(missing_docs)]

use axum::{routing::get, Router};
use roulette_core::ResponseGenerator;

mod handlers;
use self::handlers::{handle_health, handle_root};

/// Builds the application router.
///
/// Unknown paths get axum's default 404, and methods other than `GET`/`HEAD` on known paths get a 405.
pub fn build_router(generator: ResponseGenerator) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .with_state(generator)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use http::{Method, StatusCode};
    use roulette_core::{
        trace::propagation::ExtractionStyles, SequenceRandom, ServiceIdentity, SharedRandomSource, Tracer,
    };
    use tower::ServiceExt as _;

    use super::*;

    fn router() -> Router {
        let tracer = Tracer::new(ServiceIdentity::new("service-a", "test", "0.0.0"), ExtractionStyles::default());
        build_router(ResponseGenerator::new(tracer, SharedRandomSource::new(SequenceRandom::new([0.0]))))
    }

    async fn status_of(method: Method, path: &str) -> StatusCode {
        let request = Request::builder().method(method).uri(path).body(Body::empty()).unwrap();
        router().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn routes() {
        assert_eq!(status_of(Method::GET, "/").await, StatusCode::OK);
        assert_eq!(status_of(Method::GET, "/health").await, StatusCode::OK);
        assert_eq!(status_of(Method::GET, "/missing").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of(Method::POST, "/").await, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_of(Method::DELETE, "/health").await, StatusCode::METHOD_NOT_ALLOWED);
    }
}
