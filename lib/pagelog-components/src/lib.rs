//! Pipeline components.
//!
//! Sources produce batches of raw events, destinations persist structured rows, quarantined records and aggregate
//! output, and the adapters wire those together around the shared [`TransformEngine`][pagelog_core::TransformEngine].

#![deny(warnings)]
#![deny(missing_docs)]

pub mod adapters;
pub mod destinations;
pub mod sources;

pub use pagelog_core::AggregationWindow;
