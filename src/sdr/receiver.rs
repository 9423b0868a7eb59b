// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Receiver driver interface.
//!
//! A [`Receiver`] is opened on the scanner thread and never leaves it, so
//! implementations do not need to be `Send`. Only the factory that opens one
//! crosses the thread boundary.

use std::sync::Arc;

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::demo_source::DemoReceiver;
use super::rtlsdr_source::GainMode;

/// Errors raised by receiver drivers.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("failed to open receiver: {0}")]
    Open(String),

    #[error("failed to configure receiver: {0}")]
    Config(String),

    #[error("receiver read failed: {0}")]
    Read(String),

    #[error("{0}")]
    Unsupported(String),
}

/// Tunable sample source.
///
/// Dropping a receiver closes it.
pub trait Receiver {
    /// Tune to `hz`.
    fn set_frequency(&mut self, hz: u32) -> Result<(), ReceiverError>;

    fn set_gain(&mut self, gain: GainMode) -> Result<(), ReceiverError>;

    /// Frequency correction in parts per million.
    fn set_freq_correction(&mut self, ppm: i32) -> Result<(), ReceiverError>;

    /// Block until `count` complex samples have been read.
    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>, ReceiverError>;

    /// Supported tuner gains in dB, ascending.
    fn gains(&self) -> Vec<f32>;
}

/// Opens a receiver on the thread that will use it.
pub type ReceiverFactory =
    Arc<dyn Fn() -> Result<Box<dyn Receiver>, ReceiverError> + Send + Sync>;

/// Which receiver to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReceiverKind {
    /// Synthetic signals, no hardware needed
    Demo,
    /// RTL-SDR dongle
    RtlSdr {
        /// Device index (0-based)
        device_index: u32,
    },
}

impl Default for ReceiverKind {
    fn default() -> Self {
        Self::RtlSdr { device_index: 0 }
    }
}

/// Build a factory for the configured receiver.
#[must_use]
pub fn receiver_factory(kind: ReceiverKind, sample_rate: u32) -> ReceiverFactory {
    Arc::new(move || open_receiver(&kind, sample_rate))
}

/// Open the configured receiver.
pub fn open_receiver(
    kind: &ReceiverKind,
    sample_rate: u32,
) -> Result<Box<dyn Receiver>, ReceiverError> {
    match kind {
        ReceiverKind::Demo => Ok(Box::new(DemoReceiver::new(sample_rate))),
        ReceiverKind::RtlSdr { device_index } => open_rtlsdr(*device_index, sample_rate),
    }
}

#[cfg(feature = "hardware")]
fn open_rtlsdr(device_index: u32, sample_rate: u32) -> Result<Box<dyn Receiver>, ReceiverError> {
    Ok(Box::new(super::rtlsdr_source::RtlSdrReceiver::open(
        device_index,
        sample_rate,
    )?))
}

#[cfg(not(feature = "hardware"))]
fn open_rtlsdr(_device_index: u32, _sample_rate: u32) -> Result<Box<dyn Receiver>, ReceiverError> {
    Err(ReceiverError::Unsupported(
        "RTL-SDR hardware support not compiled (enable 'hardware' feature)".to_string(),
    ))
}

/// Open the receiver once to read its gain table, then close it.
///
/// Used at startup to fail early when no radio is present.
pub fn probe_gains(kind: &ReceiverKind, sample_rate: u32) -> Result<Vec<f32>, ReceiverError> {
    let receiver = open_receiver(kind, sample_rate)?;
    Ok(receiver.gains())
}
