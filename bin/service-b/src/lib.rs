//! Service B: the response generator served by a hand-rolled `hyper` accept loop.

#![deny(warnings)]
#![deny(missing_docs)]

mod listener;
pub use self::listener::Listener;

mod server;
pub use self::server::HttpServer;

mod service;
pub use self::service::RouletteService;
