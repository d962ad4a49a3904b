//! Core logic for the roulette services: outcome selection, error scenarios, response bodies, and request tracing.
//!
//! The HTTP stacks live in the service binaries. Everything here is independent of any particular server runtime, and is
//! driven through [`ResponseGenerator`].

#![deny(warnings)]
#![deny(missing_docs)]

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;
pub mod generator;
pub mod identity;
pub mod outcome;
pub mod random;
pub mod response;
pub mod scenario;
pub mod trace;

pub use self::generator::{GeneratedResponse, RequestInfo, ResponseGenerator};
pub use self::identity::ServiceIdentity;
pub use self::outcome::OutcomeClass;
pub use self::random::{RandomSource, SeededRandom, SequenceRandom, SharedRandomSource, ThreadLocalRandom};
pub use self::trace::Tracer;
