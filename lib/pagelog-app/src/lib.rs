//! Application bootstrapping.
//!
//! Helpers for getting a process ready to run: structured logging, an in-process metrics recorder, and the lenient
//! deserializers used by their configuration.
#![deny(warnings)]
#![deny(missing_docs)]

mod deser;

pub mod logging;
pub mod metrics;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration, LoggingGuard};
    pub use super::metrics::{initialize_metrics, MetricsHandle};
}
