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

//! Per-frequency signal detection.
//!
//! A [`Monitor`] watches one frequency. Each scan it receives the power level
//! of the matching spectrum bin and tracks whether a signal is present:
//!
//! ```text
//! Idle --level >= threshold--> Open
//! Open --level <  threshold--> Idle   (signal completed)
//! Open --no level / stopped--> Idle   (signal completed)
//! ```
//!
//! Completed signals are appended to the monitor's history and handed back to
//! the caller so they can be exported or alerted on.

use uuid::Uuid;

use crate::signal::{OpenSignal, Period, Position, Signal};

/// Stable identifier for a monitor within a session.
pub type MonitorId = Uuid;

/// Signal detector for a single frequency.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub(crate) id: MonitorId,
    pub(crate) frequency: f64,
    pub(crate) enabled: bool,
    pub(crate) threshold: f32,
    pub(crate) calibration: f32,
    pub(crate) alert: bool,
    pub(crate) recording: bool,
    pub(crate) current: Option<OpenSignal>,
    pub(crate) signals: Vec<Signal>,
    pub(crate) periods: Vec<Period>,
}

impl Monitor {
    /// Create an enabled, non-recording monitor for `frequency` (MHz).
    #[must_use]
    pub fn new(frequency: f64, threshold: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            frequency,
            enabled: true,
            threshold,
            calibration: 0.0,
            alert: false,
            recording: false,
            current: None,
            signals: Vec::new(),
            periods: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Watched frequency in MHz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the monitor.
    ///
    /// A disabled monitor is frozen. Re-enabling it starts from idle, dropping
    /// any signal that was open when it was disabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.current = None;
        }
        self.enabled = enabled;
    }

    /// Detection threshold in dB.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Offset in dB added to raw levels before comparing with the threshold.
    #[must_use]
    pub fn calibration(&self) -> f32 {
        self.calibration
    }

    pub fn set_calibration(&mut self, calibration: f32) {
        self.calibration = calibration;
    }

    #[must_use]
    pub fn alert(&self) -> bool {
        self.alert
    }

    pub fn set_alert(&mut self, alert: bool) {
        self.alert = alert;
    }

    #[must_use]
    pub fn recording(&self) -> bool {
        self.recording
    }

    /// The signal currently in progress, if any.
    #[must_use]
    pub fn current_signal(&self) -> Option<&OpenSignal> {
        self.current.as_ref()
    }

    /// Completed signals in detection order.
    #[must_use]
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Recording periods in the order they were started.
    #[must_use]
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// Whether a raw level counts as signal present.
    #[must_use]
    pub fn is_present(&self, level: f32) -> bool {
        level + self.calibration >= self.threshold
    }

    /// Feed one scan's level for this monitor's frequency.
    ///
    /// `None` means no level is available (not recording). Returns the signal
    /// that this update completed, if any.
    pub fn update(
        &mut self,
        level: Option<f32>,
        timestamp: f64,
        position: Option<Position>,
    ) -> Option<Signal> {
        if !self.enabled {
            return None;
        }

        let present = self.recording && level.is_some_and(|l| self.is_present(l));

        match (self.current, present) {
            (None, true) => {
                self.current = Some(OpenSignal {
                    start: timestamp,
                    position,
                });
                None
            }
            (Some(_), true) | (None, false) => None,
            (Some(_), false) => self.close(timestamp),
        }
    }

    /// Start or stop recording.
    ///
    /// Stopping closes any open signal at `timestamp` and returns it, and
    /// ends the current recording period. Starting opens a new period.
    pub fn set_recording(&mut self, recording: bool, timestamp: f64) -> Option<Signal> {
        if recording == self.recording {
            return None;
        }
        self.recording = recording;

        if recording {
            self.periods.push(Period {
                start: timestamp,
                end: None,
            });
            None
        } else {
            if let Some(period) = self.periods.last_mut().filter(|p| p.end.is_none()) {
                period.end = Some(timestamp.max(period.start));
            }
            self.close(timestamp)
        }
    }

    /// Force any open signal closed at `timestamp`.
    pub fn stop(&mut self, timestamp: f64) -> Option<Signal> {
        self.close(timestamp)
    }

    fn close(&mut self, timestamp: f64) -> Option<Signal> {
        let signal = self.current.take()?.close(timestamp);
        self.signals.push(signal);
        Some(signal)
    }

    /// Discard signal history and finished recording periods.
    pub fn clear(&mut self) {
        self.signals.clear();
        self.periods.retain(|p| p.end.is_none());
    }

    /// Fraction of recorded time during which a signal was present.
    #[must_use]
    pub fn activity(&self, now: f64) -> f64 {
        let recorded: f64 = self.periods.iter().map(|p| p.duration(now)).sum();
        if recorded <= 0.0 {
            return 0.0;
        }
        let active: f64 = self.signals.iter().map(Signal::duration).sum::<f64>()
            + self.current.map_or(0.0, |s| (now - s.start).max(0.0));
        (active / recorded).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_monitor(threshold: f32) -> Monitor {
        let mut monitor = Monitor::new(100.0, threshold);
        monitor.set_recording(true, 0.0);
        monitor
    }

    #[test]
    fn test_single_signal_from_level_sequence() {
        let mut monitor = recording_monitor(-50.0);

        assert!(monitor.update(Some(-40.0), 1.0, None).is_none());
        assert!(monitor.update(Some(-45.0), 2.0, None).is_none());
        let signal = monitor.update(Some(-60.0), 3.0, None).unwrap();

        assert_eq!(signal.start, 1.0);
        assert_eq!(signal.end, 3.0);
        assert_eq!(monitor.signals(), &[signal]);
        assert!(monitor.current_signal().is_none());
    }

    #[test]
    fn test_level_equal_to_threshold_is_present() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(-50.0), 1.0, None);
        assert!(monitor.current_signal().is_some());
    }

    #[test]
    fn test_zero_length_signal_is_recorded() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(-10.0), 5.0, None);
        let signal = monitor.update(Some(-90.0), 5.0, None).unwrap();
        assert_eq!(signal.duration(), 0.0);
        assert_eq!(monitor.signals().len(), 1);
    }

    #[test]
    fn test_missing_level_closes_open_signal() {
        let mut monitor = recording_monitor(-50.0);
        assert!(monitor.update(None, 1.0, None).is_none());
        monitor.update(Some(0.0), 2.0, None);
        let signal = monitor.update(None, 4.0, None).unwrap();
        assert_eq!((signal.start, signal.end), (2.0, 4.0));
    }

    #[test]
    fn test_not_recording_ignores_levels() {
        let mut monitor = Monitor::new(100.0, -50.0);
        assert!(monitor.update(Some(0.0), 1.0, None).is_none());
        assert!(monitor.current_signal().is_none());
        assert!(monitor.signals().is_empty());
    }

    #[test]
    fn test_stop_recording_closes_at_stop_time() {
        let mut monitor = recording_monitor(-50.0);
        let pos = Position::new(1.0, 2.0);
        monitor.update(Some(0.0), 10.0, Some(pos));

        let signal = monitor.set_recording(false, 12.5).unwrap();
        assert_eq!(signal.end, 12.5);
        assert_eq!(signal.position, Some(pos));
        assert_eq!(monitor.periods(), &[Period { start: 0.0, end: Some(12.5) }]);

        // Further levels are ignored while stopped
        assert!(monitor.update(Some(0.0), 13.0, None).is_none());
        assert_eq!(monitor.signals().len(), 1);
    }

    #[test]
    fn test_calibration_is_added_to_level() {
        let mut monitor = recording_monitor(-50.0);
        monitor.set_calibration(15.0);
        assert!(monitor.is_present(-65.0));
        assert!(!monitor.is_present(-65.5));
        monitor.update(Some(-60.0), 1.0, None);
        assert!(monitor.current_signal().is_some());
    }

    #[test]
    fn test_threshold_change_affects_next_comparison_only() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(-40.0), 1.0, None);
        monitor.set_threshold(-30.0);
        let signal = monitor.update(Some(-40.0), 2.0, None).unwrap();
        assert_eq!(signal.start, 1.0);
    }

    #[test]
    fn test_disabled_monitor_is_frozen_and_restarts_idle() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(0.0), 1.0, None);
        monitor.set_enabled(false);

        assert!(monitor.update(Some(-90.0), 2.0, None).is_none());
        assert!(monitor.current_signal().is_some());

        monitor.set_enabled(true);
        assert!(monitor.current_signal().is_none());
        assert!(monitor.update(Some(-90.0), 3.0, None).is_none());
        assert!(monitor.signals().is_empty());
    }

    #[test]
    fn test_signals_ordered_and_never_duplicated() {
        let mut monitor = recording_monitor(-50.0);
        let levels = [-40.0, -60.0, -60.0, -40.0, -40.0, -60.0, -40.0, -60.0];
        let mut completed = 0;
        let mut last_len = 0;
        for (t, level) in (0u8..).zip(levels) {
            if monitor.update(Some(level), f64::from(t), None).is_some() {
                completed += 1;
            }
            assert!(monitor.signals().len() >= last_len);
            last_len = monitor.signals().len();
        }
        assert_eq!(completed, 3);
        assert_eq!(monitor.signals().len(), 3);
        assert!(monitor.signals().windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn test_activity_ratio() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(0.0), 2.0, None);
        monitor.update(Some(-90.0), 4.0, None);
        monitor.set_recording(false, 10.0);
        assert!((monitor.activity(10.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_clear_keeps_running_period() {
        let mut monitor = recording_monitor(-50.0);
        monitor.update(Some(0.0), 1.0, None);
        monitor.update(Some(-90.0), 2.0, None);
        monitor.clear();
        assert!(monitor.signals().is_empty());
        assert_eq!(monitor.periods().len(), 1);
    }
}
