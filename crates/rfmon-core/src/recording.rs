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

//! `.rfmon` session files and export records.
//!
//! A session file is a JSON document holding the receiver settings and every
//! monitor with its signal history:
//!
//! ```text
//! {"Version": 1, "Frequency": 100.0, "Gain": 29.7, "Calibration": 0.0,
//!  "Monitors": [{"Enabled": true, "Alert": false, "Frequency": 100.0,
//!                "Threshold": -40.0, "Calibration": 0.0,
//!                "Signals": [{"Start": 1.0, "End": 2.0, "Location": null}],
//!                "Periods": [{"Start": 0.0, "End": 3.0}]}]}
//! ```

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::monitor::Monitor;
use crate::signal::{Period, Position, Signal};

/// Current session file version.
pub const FILE_VERSION: u32 = 1;

/// File extension used for session files.
pub const FILE_EXTENSION: &str = "rfmon";

/// Errors reading or writing session files.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported file version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid signal for monitor at {frequency} MHz: end {end} before start {start}")]
    InvalidSignal { frequency: f64, start: f64, end: f64 },
}

/// Receiver settings and monitors restored from a session file.
#[derive(Debug, Clone)]
pub struct Session {
    /// Tuned centre frequency in MHz.
    pub frequency: f64,
    /// Tuner gain in dB, `None` for automatic.
    pub gain: Option<f32>,
    /// Receiver frequency correction in ppm.
    pub calibration: f32,
    pub monitors: Vec<Monitor>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionFile {
    version: u32,
    frequency: f64,
    #[serde(default)]
    gain: Option<f32>,
    #[serde(default)]
    calibration: f32,
    #[serde(default)]
    monitors: Vec<MonitorRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitorRecord {
    enabled: bool,
    alert: bool,
    frequency: f64,
    threshold: f32,
    #[serde(default)]
    calibration: f32,
    #[serde(default)]
    signals: Vec<Signal>,
    #[serde(default)]
    periods: Vec<Period>,
}

impl From<&Monitor> for MonitorRecord {
    fn from(monitor: &Monitor) -> Self {
        Self {
            enabled: monitor.enabled,
            alert: monitor.alert,
            frequency: monitor.frequency,
            threshold: monitor.threshold,
            calibration: monitor.calibration,
            signals: monitor.signals.clone(),
            periods: monitor.periods.clone(),
        }
    }
}

impl TryFrom<MonitorRecord> for Monitor {
    type Error = RecordingError;

    fn try_from(record: MonitorRecord) -> Result<Self, Self::Error> {
        if let Some(bad) = record.signals.iter().find(|s| s.end < s.start) {
            return Err(RecordingError::InvalidSignal {
                frequency: record.frequency,
                start: bad.start,
                end: bad.end,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            frequency: record.frequency,
            enabled: record.enabled,
            threshold: record.threshold,
            calibration: record.calibration,
            alert: record.alert,
            recording: false,
            current: None,
            signals: record.signals,
            periods: record.periods,
        })
    }
}

/// Serialize a session to JSON.
pub fn to_json(
    frequency: f64,
    gain: Option<f32>,
    calibration: f32,
    monitors: &[Monitor],
) -> Result<String, RecordingError> {
    let file = SessionFile {
        version: FILE_VERSION,
        frequency,
        gain,
        calibration,
        monitors: monitors.iter().map(MonitorRecord::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parse a session from JSON.
///
/// Nothing is returned unless the whole document is valid.
pub fn from_json(json: &str) -> Result<Session, RecordingError> {
    let file: SessionFile = serde_json::from_str(json)?;
    if file.version > FILE_VERSION {
        return Err(RecordingError::UnsupportedVersion(file.version));
    }

    let monitors = file
        .monitors
        .into_iter()
        .map(Monitor::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Session {
        frequency: file.frequency,
        gain: file.gain,
        calibration: file.calibration,
        monitors,
    })
}

/// Write a session file, replacing any existing file only once fully written.
pub fn save(
    path: &Path,
    frequency: f64,
    gain: Option<f32>,
    calibration: f32,
    monitors: &[Monitor],
) -> Result<(), RecordingError> {
    let json = to_json(frequency, gain, calibration, monitors)?;
    let tmp = path.with_extension("rfmon.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a session file.
pub fn load(path: &Path) -> Result<Session, RecordingError> {
    let json = fs::read_to_string(path)?;
    from_json(&json)
}

/// A completed signal as sent to export consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Monitor frequency in MHz.
    pub frequency: f64,
    pub start: f64,
    pub end: f64,
    pub position: Option<Position>,
}

impl ExportRecord {
    #[must_use]
    pub fn new(frequency: f64, signal: &Signal) -> Self {
        Self {
            frequency,
            start: signal.start,
            end: signal.end,
            position: signal.position,
        }
    }

    /// Encode as a single newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
