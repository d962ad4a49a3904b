//! Generic error handling.

use std::fmt::Display;

/// A type-erased error, used at application boundaries where the exact error type does not matter.
pub type GenericError = anyhow::Error;

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments, or a value implementing `Debug` and `Display` such as an
/// existing error. When given an existing error, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::error::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::error::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::error::_anyhow!($fmt, $($arg)*) };
}

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension methods for attaching context to errors.
///
/// Wraps `anyhow::Context` under different method names, so it can be used alongside `snafu::ResultExt`.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context that is only evaluated if an error occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn context_wraps_source() {
        let result: Result<(), io::Error> = Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        let error = result.error_context("Failed to open log file.").unwrap_err();

        assert_eq!(error.to_string(), "Failed to open log file.");
        assert_eq!(error.root_cause().to_string(), "no such file");
    }

    #[test]
    fn lazy_context_only_on_error() {
        let result: Result<u8, io::Error> = Ok(7);
        let value = result
            .with_error_context(|| -> String { panic!("context evaluated for a successful result") })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn macro_forms() {
        assert_eq!(generic_error!("plain").to_string(), "plain");
        assert_eq!(generic_error!("port {} in use", 8080).to_string(), "port 8080 in use");

        let io_error = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        assert_eq!(generic_error!(io_error).to_string(), "address in use");
    }
}
