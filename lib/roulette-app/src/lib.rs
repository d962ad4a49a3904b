//! Application scaffolding shared by the roulette services: configuration, logging, error handling, and shutdown.

#![deny(warnings)]
#![deny(missing_docs)]

pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod signals;
pub mod trace_export;

/// Commonly used items.
pub mod prelude {
    pub use crate::bootstrap::BootstrapArgs;
    pub use crate::config::{ConfigurationLoader, GenericConfiguration, ServerConfiguration};
    pub use crate::error::{ErrorContext, GenericError};
    pub use crate::generic_error;
    pub use crate::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration, LoggingGuard};
    pub use crate::signals::{spawn_signal_handlers, ShutdownSignal};
    pub use crate::trace_export::{spawn_trace_exporter, TraceExportConfiguration, TraceExporterHandle};
}
