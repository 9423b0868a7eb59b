//! RTL-SDR hardware receiver.
//!
//! This module provides RTL-SDR device enumeration, gain handling and the
//! [`Receiver`](super::receiver::Receiver) implementation used by the scanner.
//! Enable the `hardware` feature to compile with RTL-SDR support.

#[cfg(feature = "hardware")]
use num_complex::Complex;

#[cfg(feature = "hardware")]
use super::receiver::{Receiver, ReceiverError};

/// Information about an RTL-SDR device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device index (0-based)
    pub index: u32,
    /// Device name (manufacturer + product)
    pub name: String,
    /// Device serial number
    pub serial: String,
}

/// Gain mode for RTL-SDR tuner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainMode {
    /// Automatic gain control
    Auto,
    /// Manual gain (value in tenths of dB, e.g. 496 = 49.6 dB)
    Manual(i32),
}

impl GainMode {
    /// Manual gain in dB, or automatic for `None`.
    #[must_use]
    pub fn from_db(gain: Option<f32>) -> Self {
        match gain {
            #[allow(clippy::cast_possible_truncation, reason = "tuner gains are a few hundred tenths of dB")]
            Some(db) => Self::Manual((db * 10.0).round() as i32),
            None => Self::Auto,
        }
    }
}

/// Enumerate available RTL-SDR devices.
///
/// When the `hardware` feature is disabled, returns an empty list.
#[cfg(feature = "hardware")]
pub fn list_devices() -> Vec<DeviceInfo> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    #[allow(clippy::cast_sign_loss, reason = "device indices are non-negative")]
    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        if let Ok(usb_strings) = rtlsdr::get_device_usb_strings(i) {
            devices.push(DeviceInfo {
                index: i as u32,
                name,
                serial: usb_strings.serial,
            });
        }
    }

    devices
}

/// Enumerate available RTL-SDR devices (stub when hardware feature is disabled).
#[cfg(not(feature = "hardware"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

/// Convert interleaved unsigned 8-bit I/Q bytes to complex samples in -1.0..1.0.
#[must_use]
pub fn convert_u8_iq(buf: &[u8]) -> Vec<num_complex::Complex<f32>> {
    buf.chunks_exact(2)
        .map(|iq| {
            num_complex::Complex::new(
                (f32::from(iq[0]) - 127.5) / 127.5,
                (f32::from(iq[1]) - 127.5) / 127.5,
            )
        })
        .collect()
}

/// An open RTL-SDR dongle.
///
/// The device is closed when this value is dropped, releasing the USB interface.
#[cfg(feature = "hardware")]
pub struct RtlSdrReceiver {
    device: rtlsdr::RTLSDRDevice,
    index: u32,
    gains: Vec<f32>,
}

#[cfg(feature = "hardware")]
impl std::fmt::Debug for RtlSdrReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtlSdrReceiver")
            .field("index", &self.index)
            .field("gains", &self.gains)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "hardware")]
impl RtlSdrReceiver {
    /// Open device `index` and set its sample rate.
    pub fn open(index: u32, sample_rate: u32) -> Result<Self, ReceiverError> {
        log::info!("Opening RTL-SDR device {index}...");

        #[allow(clippy::cast_possible_wrap, reason = "device indices are small")]
        let mut device = rtlsdr::open(index as i32)
            .map_err(|e| ReceiverError::Open(format!("RTL-SDR device {index}: {e}")))?;

        device
            .set_sample_rate(sample_rate)
            .map_err(|e| ReceiverError::Config(format!("failed to set sample rate: {e}")))?;

        #[allow(clippy::cast_precision_loss, reason = "tenths of dB")]
        let gains = device
            .get_tuner_gains()
            .map(|gains| gains.into_iter().map(|g| g as f32 / 10.0).collect())
            .unwrap_or_default();

        device
            .reset_buffer()
            .map_err(|e| ReceiverError::Config(format!("failed to reset buffer: {e}")))?;

        log::info!("RTL-SDR device {index} opened at {:.3} MHz sample rate", f64::from(sample_rate) / 1e6);

        Ok(Self {
            device,
            index,
            gains,
        })
    }
}

#[cfg(feature = "hardware")]
impl Receiver for RtlSdrReceiver {
    fn set_frequency(&mut self, hz: u32) -> Result<(), ReceiverError> {
        self.device
            .set_center_freq(hz)
            .map_err(|e| ReceiverError::Config(format!("failed to set center frequency: {e}")))
    }

    fn set_gain(&mut self, gain: GainMode) -> Result<(), ReceiverError> {
        match gain {
            GainMode::Auto => self
                .device
                .set_tuner_gain_mode(false)
                .map_err(|e| ReceiverError::Config(format!("failed to set gain mode: {e}"))),
            GainMode::Manual(tenths_db) => {
                self.device
                    .set_tuner_gain_mode(true)
                    .map_err(|e| ReceiverError::Config(format!("failed to set gain mode: {e}")))?;
                self.device
                    .set_tuner_gain(tenths_db)
                    .map_err(|e| ReceiverError::Config(format!("failed to set gain: {e}")))
            }
        }
    }

    fn set_freq_correction(&mut self, ppm: i32) -> Result<(), ReceiverError> {
        if ppm == 0 {
            return Ok(());
        }
        self.device
            .set_freq_correction(ppm)
            .map_err(|e| ReceiverError::Config(format!("failed to set PPM correction: {e}")))
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>, ReceiverError> {
        // Reads must be a multiple of the 512 byte USB packet size
        let len = (count * 2).div_ceil(512) * 512;
        let buf = self
            .device
            .read_sync(len)
            .map_err(|e| ReceiverError::Read(format!("RTL-SDR device {}: {e}", self.index)))?;
        let mut samples = convert_u8_iq(&buf);
        samples.truncate(count);
        Ok(samples)
    }

    fn gains(&self) -> Vec<f32> {
        self.gains.clone()
    }
}

#[cfg(feature = "hardware")]
impl Drop for RtlSdrReceiver {
    fn drop(&mut self) {
        // The device closes itself when dropped
        log::info!("Closing RTL-SDR device {}, releasing USB interface", self.index);
    }
}
