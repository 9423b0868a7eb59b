//! SDR (Software Defined Radio) module for spectrum scanning.
//!
//! This module provides:
//! - Receiver drivers (RTL-SDR hardware or a synthetic demo source)
//! - Welch power spectrum estimation
//! - The scanner thread that feeds spectrum samples onto the event bus

pub mod demo_source;
pub mod estimator;
pub mod receiver;
pub mod rtlsdr_source;
pub mod scanner;

pub use estimator::Estimator;
pub use receiver::{probe_gains, receiver_factory, ReceiverError, ReceiverFactory, ReceiverKind};
pub use rtlsdr_source::{list_devices, DeviceInfo, GainMode};
pub use scanner::{ScanError, ScanSettings, Scanner};
