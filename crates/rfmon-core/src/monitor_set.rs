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

//! Ordered collection of monitors fed from spectrum scans.

use log::debug;

use crate::event::SpectrumSample;
use crate::monitor::{Monitor, MonitorId};
use crate::signal::{Position, Signal};

/// A signal completed by one of the monitors in a set.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub monitor: MonitorId,
    /// Frequency of the owning monitor in MHz.
    pub frequency: f64,
    pub signal: Signal,
    /// Whether the owning monitor has alerts enabled.
    pub alert: bool,
}

/// Outcome of dispatching one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    /// Completed signals in monitor registration order.
    pub completed: Vec<Completed>,
}

impl Dispatch {
    /// True when any monitor completed a signal.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.completed.is_empty()
    }
}

/// Find the bin nearest to `target`.
///
/// `frequencies` must be ascending and evenly spaced. A bin only matches when
/// it lies within one bin width of the target; when two bins are equally
/// close the lower one wins.
#[must_use]
pub fn nearest_bin(frequencies: &[f64], target: f64) -> Option<usize> {
    let width = match frequencies {
        [] => return None,
        [only] => return ((only - target).abs() <= f64::EPSILON * only.abs().max(1.0)).then_some(0),
        [first, .., last] => {
            #[allow(clippy::cast_precision_loss, reason = "bin counts are far below 2^52")]
            let steps = (frequencies.len() - 1) as f64;
            (last - first) / steps
        }
    };

    let upper = frequencies.partition_point(|&f| f < target);
    let index = match upper {
        0 => 0,
        i if i == frequencies.len() => i - 1,
        i => {
            let below = target - frequencies[i - 1];
            let above = frequencies[i] - target;
            if below <= above {
                i - 1
            } else {
                i
            }
        }
    };

    ((frequencies[index] - target).abs() <= width).then_some(index)
}

/// Monitors in registration order plus the smoothed display spectrum.
#[derive(Debug, Clone, Default)]
pub struct MonitorSet {
    monitors: Vec<Monitor>,
    smoothed: Vec<f32>,
}

impl MonitorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from monitors, keeping their order.
    #[must_use]
    pub fn from_monitors(monitors: Vec<Monitor>) -> Self {
        Self {
            monitors,
            smoothed: Vec::new(),
        }
    }

    /// Append a monitor and return its id.
    pub fn add(&mut self, monitor: Monitor) -> MonitorId {
        let id = monitor.id();
        self.monitors.push(monitor);
        id
    }

    /// Remove a monitor, keeping the order of the rest.
    pub fn remove(&mut self, id: MonitorId) -> Option<Monitor> {
        let index = self.monitors.iter().position(|m| m.id() == id)?;
        Some(self.monitors.remove(index))
    }

    #[must_use]
    pub fn get(&self, id: MonitorId) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.id() == id)
    }

    pub fn get_mut(&mut self, id: MonitorId) -> Option<&mut Monitor> {
        self.monitors.iter_mut().find(|m| m.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.iter()
    }

    #[must_use]
    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Smoothed spectrum in dB, parallel to the last scan's frequencies.
    #[must_use]
    pub fn smoothed(&self) -> &[f32] {
        &self.smoothed
    }

    pub fn reset_spectrum(&mut self) {
        self.smoothed.clear();
    }

    /// Route one scan to every enabled monitor.
    ///
    /// Also folds the scan into the smoothed spectrum as
    /// `smoothed = (smoothed + levels) / 2`, seeding it with the first scan.
    pub fn dispatch(&mut self, sample: &SpectrumSample, position: Option<Position>) -> Dispatch {
        if self.smoothed.len() == sample.levels.len() {
            for (smoothed, level) in self.smoothed.iter_mut().zip(&sample.levels) {
                *smoothed = (*smoothed + level) / 2.0;
            }
        } else {
            self.smoothed.clone_from(&sample.levels);
        }

        let mut dispatch = Dispatch::default();
        for monitor in self.monitors.iter_mut().filter(|m| m.enabled()) {
            let Some(level) = nearest_bin(&sample.frequencies, monitor.frequency())
                .and_then(|i| sample.levels.get(i).copied())
            else {
                debug!("No bin for monitor at {:.4} MHz", monitor.frequency());
                continue;
            };

            if let Some(signal) = monitor.update(Some(level), sample.timestamp, position) {
                dispatch.completed.push(Completed {
                    monitor: monitor.id(),
                    frequency: monitor.frequency(),
                    signal,
                    alert: monitor.alert(),
                });
            }
        }
        dispatch
    }

    /// Start or stop recording on every monitor with one shared timestamp.
    pub fn set_recording(&mut self, recording: bool, timestamp: f64) -> Vec<Completed> {
        self.collect(|m| m.set_recording(recording, timestamp))
    }

    /// Force every open signal closed.
    pub fn stop_all(&mut self, timestamp: f64) -> Vec<Completed> {
        self.collect(|m| m.stop(timestamp))
    }

    fn collect(&mut self, mut f: impl FnMut(&mut Monitor) -> Option<Signal>) -> Vec<Completed> {
        self.monitors
            .iter_mut()
            .filter_map(|m| {
                f(m).map(|signal| Completed {
                    monitor: m.id(),
                    frequency: m.frequency(),
                    signal,
                    alert: m.alert(),
                })
            })
            .collect()
    }

    /// Discard every monitor's history.
    pub fn clear_recordings(&mut self) {
        for monitor in &mut self.monitors {
            monitor.clear();
        }
    }

    /// Whether any monitor holds a completed signal.
    #[must_use]
    pub fn has_recordings(&self) -> bool {
        self.monitors.iter().any(|m| !m.signals().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn axis() -> Arc<[f64]> {
        Arc::from(vec![99.8, 99.9, 100.0, 100.1, 100.2])
    }

    fn sample(levels: &[f32], timestamp: f64) -> SpectrumSample {
        SpectrumSample {
            levels: levels.to_vec(),
            frequencies: axis(),
            timestamp,
            generation: 1,
        }
    }

    fn recording(frequency: f64, threshold: f32) -> Monitor {
        let mut monitor = Monitor::new(frequency, threshold);
        monitor.set_recording(true, 0.0);
        monitor
    }

    #[test]
    fn test_nearest_bin_exact_and_nearby() {
        let freqs = axis();
        assert_eq!(nearest_bin(&freqs, 100.0), Some(2));
        assert_eq!(nearest_bin(&freqs, 100.04), Some(2));
        assert_eq!(nearest_bin(&freqs, 100.06), Some(3));
    }

    #[test]
    fn test_nearest_bin_tie_goes_low() {
        let freqs: Vec<f64> = vec![1.0, 2.0, 3.0];
        assert_eq!(nearest_bin(&freqs, 1.5), Some(0));
        assert_eq!(nearest_bin(&freqs, 2.5), Some(1));
    }

    #[test]
    fn test_nearest_bin_outside_axis() {
        let freqs: Vec<f64> = vec![1.0, 2.0, 3.0];
        assert_eq!(nearest_bin(&freqs, 3.9), Some(2));
        assert_eq!(nearest_bin(&freqs, 4.5), None);
        assert_eq!(nearest_bin(&freqs, -0.5), None);
        assert_eq!(nearest_bin(&[], 1.0), None);
    }

    #[test]
    fn test_dispatch_routes_levels_to_monitors() {
        let mut set = MonitorSet::new();
        let low = set.add(recording(99.9, -50.0));
        let high = set.add(recording(100.1, -50.0));

        let dispatch = set.dispatch(&sample(&[-90.0, -10.0, -90.0, -90.0, -90.0], 1.0), None);
        assert!(!dispatch.changed());
        assert!(set.get(low).unwrap().current_signal().is_some());
        assert!(set.get(high).unwrap().current_signal().is_none());

        let dispatch = set.dispatch(&sample(&[-90.0; 5], 2.0), None);
        assert!(dispatch.changed());
        assert_eq!(dispatch.completed.len(), 1);
        assert_eq!(dispatch.completed[0].monitor, low);
        assert_eq!(dispatch.completed[0].frequency, 99.9);
        assert_eq!(dispatch.completed[0].signal.start, 1.0);
        assert_eq!(dispatch.completed[0].signal.end, 2.0);
    }

    #[test]
    fn test_dispatch_order_follows_registration() {
        let mut set = MonitorSet::new();
        let first = set.add(recording(100.2, -50.0));
        let second = set.add(recording(99.8, -50.0));

        set.dispatch(&sample(&[0.0; 5], 1.0), None);
        let dispatch = set.dispatch(&sample(&[-90.0; 5], 2.0), None);
        let order: Vec<_> = dispatch.completed.iter().map(|c| c.monitor).collect();
        assert_eq!(order, vec![first, second]);
    }

    #[test]
    fn test_disabled_monitor_receives_nothing() {
        let mut set = MonitorSet::new();
        let id = set.add(recording(100.0, -50.0));
        set.get_mut(id).unwrap().set_enabled(false);

        set.dispatch(&sample(&[0.0; 5], 1.0), None);
        assert!(set.get(id).unwrap().current_signal().is_none());
    }

    #[test]
    fn test_geotag_uses_position_at_signal_start() {
        let mut set = MonitorSet::new();
        set.add(recording(100.0, -50.0));
        let here = Position::new(10.0, 20.0);

        set.dispatch(&sample(&[0.0; 5], 1.0), Some(here));
        let dispatch = set.dispatch(&sample(&[-90.0; 5], 2.0), None);
        assert_eq!(dispatch.completed[0].signal.position, Some(here));
    }

    #[test]
    fn test_smoothing_halves_toward_new_levels() {
        let mut set = MonitorSet::new();
        set.dispatch(&sample(&[-80.0; 5], 1.0), None);
        assert_eq!(set.smoothed(), &[-80.0; 5]);
        set.dispatch(&sample(&[-40.0; 5], 2.0), None);
        assert_eq!(set.smoothed(), &[-60.0; 5]);
        set.reset_spectrum();
        assert!(set.smoothed().is_empty());
    }

    #[test]
    fn test_stop_all_and_recording_toggle() {
        let mut set = MonitorSet::new();
        set.add(recording(100.0, -50.0));
        set.add(recording(99.8, -50.0));
        set.dispatch(&sample(&[0.0, -90.0, 0.0, -90.0, -90.0], 1.0), None);

        let closed = set.set_recording(false, 3.0);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|c| c.signal.end == 3.0));
        assert!(set.stop_all(4.0).is_empty());
        assert!(set.has_recordings());

        set.clear_recordings();
        assert!(!set.has_recordings());
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut set = MonitorSet::new();
        let a = set.add(Monitor::new(1.0, 0.0));
        let b = set.add(Monitor::new(2.0, 0.0));
        let c = set.add(Monitor::new(3.0, 0.0));
        assert!(set.remove(b).is_some());
        assert!(set.remove(b).is_none());
        let ids: Vec<_> = set.iter().map(Monitor::id).collect();
        assert_eq!(ids, vec![a, c]);
    }
}
