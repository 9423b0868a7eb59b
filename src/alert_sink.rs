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

//! Alert output.

use std::io::Write;

use log::{info, warn};

/// Somewhere to announce an alert.
pub trait AlertSink: Send {
    fn play(&mut self, frequency: f64);
}

/// Rings the terminal bell and logs the alert.
#[derive(Debug, Default)]
pub struct BellSink {
    muted: bool,
}

impl BellSink {
    #[must_use]
    pub fn new(muted: bool) -> Self {
        Self { muted }
    }
}

impl AlertSink for BellSink {
    fn play(&mut self, frequency: f64) {
        info!("ALERT: signal on {frequency:.4} MHz");
        if self.muted {
            return;
        }
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|()| stderr.flush()) {
            warn!("Could not ring bell: {e}");
        }
    }
}

/// Collects alerts in memory.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub played: std::sync::Arc<std::sync::Mutex<Vec<f64>>>,
}

#[cfg(test)]
impl AlertSink for RecordingSink {
    fn play(&mut self, frequency: f64) {
        self.played.lock().unwrap().push(frequency);
    }
}
