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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! Command line flags override these values for a single run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gps::{GpsProtocol, GpsSettings};
use crate::network::ExporterConfig;
use crate::sdr::{GainMode, ReceiverKind, ScanSettings};

const APP_NAME: &str = "rfmonitor";
const CONFIG_NAME: &str = "config";

/// Default number of spectrum bins
pub const BINS: usize = 1024;

/// Default receiver sample rate in Hz
pub const SAMPLE_RATE: u32 = 2_400_000;

/// Settings that cannot work together.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bins must be a power of two, got {0}")]
    Bins(usize),

    #[error("sample rate must be positive")]
    SampleRate,

    #[error("samples per scan ({samples}) must be at least the bin count ({bins})")]
    SamplesPerScan { samples: usize, bins: usize },

    #[error("scan interval must be positive")]
    ScanInterval,
}

/// GPS feed configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpsConfig {
    /// Start the position source on launch
    #[serde(default)]
    pub enabled: bool,

    /// gpsd or NMEA bridge address in host:port format
    #[serde(default = "default_gps_address")]
    pub address: String,

    #[serde(default)]
    pub protocol: GpsProtocol,

    /// Seconds without a fix before the feed is restarted
    #[serde(default = "default_gps_timeout")]
    pub timeout_secs: u64,

    /// Seconds to wait before restarting a failed feed
    #[serde(default = "default_gps_retry")]
    pub retry_secs: u64,
}

/// Export server configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Stream completed signals to the server
    #[serde(default)]
    pub enabled: bool,

    /// Server address in host:port format
    #[serde(default = "default_server_address")]
    pub address: String,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Centre frequency in MHz
    #[serde(default = "default_frequency")]
    pub frequency: f64,

    /// Tuner gain in dB, unset for automatic gain
    #[serde(default)]
    pub gain: Option<f32>,

    /// Receiver frequency correction in ppm
    #[serde(default)]
    pub calibration: f32,

    /// Spectrum bins per scan
    #[serde(default = "default_bins")]
    pub bins: usize,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples read per scan
    #[serde(default = "default_samples_per_scan")]
    pub samples_per_scan: usize,

    /// Milliseconds between scans
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Event queue depth between the worker threads and the control loop
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Minimum seconds between two alerts
    #[serde(default = "default_alert_length")]
    pub alert_length_secs: f64,

    /// Ring the terminal bell on alerts
    #[serde(default = "default_true")]
    pub alert_enabled: bool,

    /// Receiver to scan with
    #[serde(default)]
    pub receiver: ReceiverKind,

    #[serde(default)]
    pub gps: GpsConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1 // Current schema version
}

fn default_true() -> bool {
    true
}

fn default_frequency() -> f64 {
    100.0
}

fn default_bins() -> usize {
    BINS
}

fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}

fn default_samples_per_scan() -> usize {
    BINS * 32
}

fn default_scan_interval_ms() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    256
}

fn default_alert_length() -> f64 {
    rfmon_core::ALERT_LENGTH
}

fn default_gps_address() -> String {
    "localhost:2947".to_string()
}

fn default_gps_timeout() -> u64 {
    crate::gps::GPS_TIMEOUT.as_secs()
}

fn default_gps_retry() -> u64 {
    crate::gps::GPS_RETRY.as_secs()
}

fn default_server_address() -> String {
    "localhost:30010".to_string()
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_gps_address(),
            protocol: GpsProtocol::default(),
            timeout_secs: default_gps_timeout(),
            retry_secs: default_gps_retry(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_server_address(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            frequency: default_frequency(),
            gain: None,
            calibration: 0.0,
            bins: default_bins(),
            sample_rate: default_sample_rate(),
            samples_per_scan: default_samples_per_scan(),
            scan_interval_ms: default_scan_interval_ms(),
            event_capacity: default_event_capacity(),
            alert_length_secs: default_alert_length(),
            alert_enabled: true,
            receiver: ReceiverKind::default(),
            gps: GpsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Check settings that depend on each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bins.is_power_of_two() {
            return Err(ConfigError::Bins(self.bins));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate);
        }
        if self.samples_per_scan < self.bins {
            return Err(ConfigError::SamplesPerScan {
                samples: self.samples_per_scan,
                bins: self.bins,
            });
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::ScanInterval);
        }
        Ok(())
    }

    #[must_use]
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            frequency: self.frequency,
            gain: GainMode::from_db(self.gain),
            calibration: self.calibration,
            bins: self.bins,
            sample_rate: self.sample_rate,
            samples_per_scan: self.samples_per_scan,
            interval: Duration::from_millis(self.scan_interval_ms),
        }
    }

    #[must_use]
    pub fn gps_settings(&self) -> GpsSettings {
        GpsSettings {
            address: self.gps.address.clone(),
            protocol: self.gps.protocol,
            timeout: Duration::from_secs(self.gps.timeout_secs),
        }
    }

    #[must_use]
    pub fn gps_retry(&self) -> Duration {
        Duration::from_secs(self.gps.retry_secs)
    }

    #[must_use]
    pub fn exporter_config(&self) -> ExporterConfig {
        ExporterConfig {
            address: self.server.address.clone(),
            ..ExporterConfig::default()
        }
    }
}
