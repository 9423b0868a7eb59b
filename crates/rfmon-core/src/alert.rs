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

//! Debounced signal alerts.

/// Default minimum spacing between alerts, in seconds.
pub const ALERT_LENGTH: f64 = 5.0;

/// Decides whether an alert may fire.
///
/// The gate is shared across all monitors: once an alert fires, every alert
/// within the following `length` seconds is suppressed.
#[derive(Debug, Clone)]
pub struct AlertGate {
    length: f64,
    last: Option<f64>,
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(ALERT_LENGTH)
    }
}

impl AlertGate {
    #[must_use]
    pub fn new(length: f64) -> Self {
        Self { length, last: None }
    }

    /// Returns true and records `now` if enough time has passed since the last alert.
    pub fn try_fire(&mut self, now: f64) -> bool {
        match self.last {
            Some(last) if now - last < self.length => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time of the last alert that fired.
    #[must_use]
    pub fn last_fired(&self) -> Option<f64> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_fires() {
        let mut gate = AlertGate::new(5.0);
        assert!(gate.try_fire(100.0));
        assert_eq!(gate.last_fired(), Some(100.0));
    }

    #[test]
    fn test_alerts_inside_window_fire_once() {
        let mut gate = AlertGate::new(5.0);
        assert!(gate.try_fire(100.0));
        assert!(!gate.try_fire(104.9));
        assert_eq!(gate.last_fired(), Some(100.0));
    }

    #[test]
    fn test_alert_at_window_edge_fires() {
        let mut gate = AlertGate::new(5.0);
        assert!(gate.try_fire(100.0));
        assert!(gate.try_fire(105.0));
        assert!(!gate.try_fire(106.0));
        assert!(gate.try_fire(110.0));
    }
}
