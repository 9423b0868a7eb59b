//! Network connectivity.
//!
//! This module handles the outbound TCP connection that streams completed
//! signals to an external collector.

pub mod exporter;

pub use exporter::{Exporter, ExporterConfig};
