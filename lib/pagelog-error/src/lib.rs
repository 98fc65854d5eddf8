//! Error primitives shared across the workspace.
//!
//! Components with a closed set of failure modes define their own `snafu` enums. Everything that sits at an
//! application boundary (adapters, the CLI, bootstrap code) speaks [`GenericError`] instead.
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// An opaque, context-carrying error.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments, or any value implementing `Debug` and `Display`. When
/// given an existing `std::error::Error`, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
    impl<T> Sealed for Option<T> {}
}

/// Extension methods for attaching context to fallible values.
///
/// This mirrors `anyhow::Context` under different method names so that it can be imported alongside
/// `snafu::ResultExt` without the two colliding.
pub trait ErrorContext<T>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context that is only evaluated if an error actually occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_source() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk on fire"));
        let err = result.error_context("Failed to write partition.").unwrap_err();

        assert_eq!(err.to_string(), "Failed to write partition.");
        assert_eq!(err.root_cause().to_string(), "disk on fire");
    }

    #[test]
    fn context_on_missing_option() {
        let value: Option<u32> = None;
        let err = value.with_error_context(|| format!("missing {}", "batch id")).unwrap_err();
        assert_eq!(err.to_string(), "missing batch id");
    }

    #[test]
    fn macro_forms() {
        let literal = generic_error!("plain");
        let formatted = generic_error!("value was {}", 42);

        assert_eq!(literal.to_string(), "plain");
        assert_eq!(formatted.to_string(), "value was 42");
    }
}
