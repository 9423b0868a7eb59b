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

//! Signal intervals, recording periods and geotags.
//!
//! Timestamps are wall-clock seconds since the Unix epoch stored as `f64`,
//! which is also how they appear in `.rfmon` files and export records.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A latitude/longitude fix in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:9.5}, {:9.5}", self.lat, self.lon)
    }
}

/// A completed signal-presence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signal {
    pub start: f64,
    pub end: f64,
    #[serde(default, rename = "Location")]
    pub position: Option<Position>,
}

impl Signal {
    /// Length of the interval in seconds. Zero-length signals are valid.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A signal that has started but not yet dropped below threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenSignal {
    pub start: f64,
    pub position: Option<Position>,
}

impl OpenSignal {
    /// Close the interval at `end`, clamping so that `start <= end` always holds.
    #[must_use]
    pub fn close(self, end: f64) -> Signal {
        Signal {
            start: self.start,
            end: end.max(self.start),
            position: self.position,
        }
    }
}

/// A span of time during which a monitor was recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Period {
    pub start: f64,
    /// `None` while recording is still running.
    #[serde(default)]
    pub end: Option<f64>,
}

impl Period {
    /// Length of the period, measuring an unfinished period up to `now`.
    #[must_use]
    pub fn duration(&self, now: f64) -> f64 {
        (self.end.unwrap_or(now) - self.start).max(0.0)
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
#[must_use]
pub fn now_timestamp() -> f64 {
    #[allow(clippy::cast_precision_loss, reason = "microsecond timestamps fit f64 for centuries")]
    let micros = Utc::now().timestamp_micros() as f64;
    micros / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_never_ends_before_start() {
        let open = OpenSignal { start: 10.0, position: None };
        let signal = open.close(9.5);
        assert_eq!(signal.start, 10.0);
        assert_eq!(signal.end, 10.0);
        assert_eq!(signal.duration(), 0.0);
    }

    #[test]
    fn test_position_display() {
        let pos = Position::new(51.5, -0.125);
        assert_eq!(pos.to_string(), " 51.50000,  -0.12500");
    }

    #[test]
    fn test_open_period_duration() {
        let period = Period { start: 100.0, end: None };
        assert_eq!(period.duration(130.0), 30.0);
        let closed = Period { start: 100.0, end: Some(110.0) };
        assert_eq!(closed.duration(130.0), 10.0);
    }

    #[test]
    fn test_now_timestamp_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_timestamp() > 1_577_836_800.0);
    }
}
