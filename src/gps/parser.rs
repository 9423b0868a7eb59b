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

//! Position report parsers.
//!
//! Two wire formats are understood, both line oriented:
//!
//! - gpsd JSON (`{"class":"TPV","mode":3,"lat":51.5,"lon":-0.1,...}`)
//! - raw NMEA 0183 GGA sentences
//!   (`$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47`)

use rfmon_core::Position;
use serde::Deserialize;
use thiserror::Error;

/// Fixes with a horizontal dilution of precision above this are reported as poor.
pub const MAX_HDOP: f64 = 5.0;

/// Errors that can occur while parsing a report line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
}

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// A usable position.
    Fix(Position),
    /// The receiver answered but the fix is missing or unreliable.
    Poor(String),
    /// Not a position report.
    Ignored,
}

/// Wire format spoken by the position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsProtocol {
    /// gpsd daemon, JSON watch mode
    #[default]
    Gpsd,
    /// Raw NMEA sentences, e.g. from a serial-to-TCP bridge
    Nmea,
}

impl GpsProtocol {
    /// Parse one line in this format.
    pub fn parse(self, line: &str) -> Result<Reading, ParseError> {
        match self {
            Self::Gpsd => parse_gpsd(line),
            Self::Nmea => parse_nmea(line),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Parse a gpsd JSON report. Only `TPV` reports carry a position.
pub fn parse_gpsd(line: &str) -> Result<Reading, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Reading::Ignored);
    }
    let report: GpsdReport =
        serde_json::from_str(line).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    if report.class != "TPV" {
        return Ok(Reading::Ignored);
    }
    // mode: 0 unknown, 1 no fix, 2 2D, 3 3D
    if report.mode < 2 {
        return Ok(Reading::Poor("No fix".to_string()));
    }
    match (report.lat, report.lon) {
        (Some(lat), Some(lon)) => Ok(Reading::Fix(Position::new(lat, lon))),
        (None, _) => Err(ParseError::MissingField("lat")),
        (_, None) => Err(ParseError::MissingField("lon")),
    }
}

/// Parse an NMEA sentence. Only GGA sentences carry a position.
pub fn parse_nmea(line: &str) -> Result<Reading, ParseError> {
    let line = line.trim();
    let Some(body) = line.strip_prefix('$') else {
        return Ok(Reading::Ignored);
    };

    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            let expected = u8::from_str_radix(checksum, 16).map_err(|_| ParseError::InvalidValue {
                field: "checksum",
                value: checksum.to_string(),
            })?;
            let computed = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if expected != computed {
                return Err(ParseError::Checksum { expected, computed });
            }
            data
        }
        None => body,
    };

    let parts: Vec<&str> = body.split(',').collect();
    // Talker id varies (GP, GN, GL...), sentence type is the last three letters
    if parts[0].len() < 5 || !parts[0].ends_with("GGA") {
        return Ok(Reading::Ignored);
    }
    if parts.len() < 9 {
        return Err(ParseError::InvalidFormat(format!(
            "GGA sentence has {} fields",
            parts.len()
        )));
    }

    let quality = parts[6];
    if quality.is_empty() || quality == "0" {
        return Ok(Reading::Poor("No fix".to_string()));
    }

    let lat = parse_coordinate(parts[2], parts[3], 2, "latitude")?;
    let lon = parse_coordinate(parts[4], parts[5], 3, "longitude")?;

    if let Ok(hdop) = parts[8].parse::<f64>() {
        if hdop > MAX_HDOP {
            return Ok(Reading::Poor(format!("Poor fix, HDOP {hdop:.1}")));
        }
    }

    Ok(Reading::Fix(Position::new(lat, lon)))
}

/// Convert `(d)ddmm.mmmm` plus hemisphere to signed decimal degrees.
fn parse_coordinate(
    value: &str,
    hemisphere: &str,
    degree_digits: usize,
    field: &'static str,
) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        field,
        value: format!("{value},{hemisphere}"),
    };

    if value.is_empty() {
        return Err(ParseError::MissingField(field));
    }
    if value.len() <= degree_digits || !value.is_char_boundary(degree_digits) {
        return Err(invalid());
    }
    let (degrees, minutes) = value.split_at(degree_digits);
    let degrees: f64 = degrees.parse().map_err(|_| invalid())?;
    let minutes: f64 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60.0 {
        return Err(invalid());
    }

    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        _ => Err(invalid()),
    }
}
