//! Logging.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use tracing::{warn, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, Layer};

use crate::error::GenericError;

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

/// Keeps the background log writers alive.
///
/// Must be held until the application is about to exit. Dropping it flushes any buffered log lines.
#[must_use]
#[derive(Default)]
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the global `tracing` subscriber.
///
/// One output is configured for the console, if enabled, and one for the log file, if set. Both share the same level
/// filter and format. Writes go through non-blocking background writers, so a slow or failing log sink never blocks
/// the caller: lines are dropped instead.
///
/// If the log file cannot be opened, a warning is logged and the console is used instead.
///
/// # Errors
///
/// If the global subscriber was already set, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration, app_name: &str) -> Result<LoggingGuard, GenericError> {
    let outputs = build_outputs(config, app_name, io::stdout());

    // A `Vec` of layers fans out to each of them, and the filter on top is applied once for all outputs.
    tracing_subscriber::registry()
        .with(outputs.layers.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    if let Some(e) = outputs.file_error {
        warn!(log_file = %config.log_file, error = %e, "Failed to open log file. Logging to console only.");
    }

    Ok(outputs.guard)
}

struct LoggingOutputs<S> {
    layers: Vec<Box<dyn Layer<S> + Send + Sync>>,
    guard: LoggingGuard,
    file_error: Option<io::Error>,
}

/// Builds one formatting layer per configured output, falling back to `console` if the log file cannot be opened.
fn build_outputs<S, W>(config: &LoggingConfiguration, app_name: &str, console: W) -> LoggingOutputs<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: io::Write + Send + 'static,
{
    let mut layers = Vec::new();
    let mut guard = LoggingGuard::default();
    let mut log_to_console = config.log_to_console;

    let mut file_error = None;
    if !config.log_file.is_empty() {
        match open_log_file(Path::new(&config.log_file)) {
            Ok(file) => {
                let (nb_file, worker_guard) = tracing_appender::non_blocking(file);
                guard.add_worker_guard(worker_guard);

                layers.push(build_formatting_layer(config.log_format_json, app_name, nb_file));
            }
            Err(e) => {
                log_to_console = true;
                file_error = Some(e);
            }
        }
    }

    if log_to_console {
        let (nb_console, worker_guard) = tracing_appender::non_blocking(console);
        guard.add_worker_guard(worker_guard);

        layers.push(build_formatting_layer(config.log_format_json, app_name, nb_console));
    }

    LoggingOutputs {
        layers,
        guard,
        file_error,
    }
}

/// Opens the log file for appending, creating it and its parent directories if needed.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write as _,
        sync::{Arc, Mutex},
    };

    use tracing::info;
    use tracing_subscriber::Registry;

    use super::*;

    #[derive(Clone, Default)]
    struct Console(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Console {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(log_to_console: bool, log_file: String) -> LoggingConfiguration {
        LoggingConfiguration {
            log_to_console,
            log_file,
            ..LoggingConfiguration::default()
        }
    }

    #[test]
    fn unopenable_log_file_falls_back_to_console() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let log_file = blocker.join("prod.log").to_string_lossy().into_owned();

        let console = Console::default();
        let outputs = build_outputs::<Registry, _>(&config(false, log_file), "roulette", console.clone());
        assert!(outputs.file_error.is_some());
        assert_eq!(outputs.layers.len(), 1);

        let subscriber = tracing_subscriber::registry().with(outputs.layers);
        tracing::subscriber::with_default(subscriber, || info!("still logging"));

        // Dropping the guard flushes the background writer.
        drop(outputs.guard);
        let written = String::from_utf8(console.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("still logging"), "console output: {}", written);
    }

    #[test]
    fn file_and_console_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("roulette.log");

        let outputs = build_outputs::<Registry, _>(
            &config(true, log_file.to_string_lossy().into_owned()),
            "roulette",
            Console::default(),
        );
        assert!(outputs.file_error.is_none());
        assert_eq!(outputs.layers.len(), 2);

        let subscriber = tracing_subscriber::registry().with(outputs.layers);
        tracing::subscriber::with_default(subscriber, || info!("to both"));
        drop(outputs.guard);

        assert!(fs::read_to_string(&log_file).unwrap().contains("to both"));
    }

    #[test]
    fn console_disabled_without_file() {
        let outputs = build_outputs::<Registry, _>(&config(false, String::new()), "roulette", Console::default());
        assert!(outputs.file_error.is_none());
        assert!(outputs.layers.is_empty());
    }

    #[test]
    fn log_file_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("prod.log");

        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"first\n").unwrap();
        drop(file);

        // Reopening appends rather than truncating.
        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"second\n").unwrap();
        drop(file);

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn log_file_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();

        assert!(open_log_file(&blocker.join("prod.log")).is_err());
    }
}
