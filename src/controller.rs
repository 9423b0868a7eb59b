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

//! The control loop.
//!
//! [`Controller`] owns every piece of mutable monitoring state: the monitors,
//! the smoothed spectrum, the last known position, the exporter and the alert
//! gate. Worker threads only post [`Event`]s; the controller drains them one
//! at a time, so none of this state needs a lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rfmon_core::recording::{self, RecordingError};
use rfmon_core::{
    event_bus, now_timestamp, AlertGate, Completed, Event, EventReceiver, EventSender,
    ExportRecord, Monitor, MonitorId, MonitorSet, Position, SpectrumSample,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::alert_sink::AlertSink;
use crate::config::AppConfig;
use crate::gps::{PositionSource, RestartTimer};
use crate::network::Exporter;
use crate::sdr::{Estimator, ReceiverFactory, ScanError, Scanner};

/// Application name shown in titles.
pub const APP_NAME: &str = "RF Monitor";

/// How often the run loop logs a status summary.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Errors from controller operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("frequency is locked while monitors exist")]
    FrequencyLocked,

    #[error("no monitor with id {0}")]
    UnknownMonitor(MonitorId),

    #[error("stop scanning before opening a file")]
    Scanning,

    #[error("no file name to save to")]
    NoFilename,

    #[error("'{name}': {source}")]
    Recording {
        name: String,
        #[source]
        source: RecordingError,
    },
}

impl ControlError {
    fn recording(path: &Path, source: RecordingError) -> Self {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self::Recording { name, source }
    }
}

/// Single owner of the monitoring session.
pub struct Controller {
    config: AppConfig,
    bus: EventSender,
    events: EventReceiver,
    monitors: MonitorSet,
    frequencies: Arc<[f64]>,
    scanner: Option<Scanner>,
    open_receiver: ReceiverFactory,
    gps: Option<PositionSource>,
    gps_restart: RestartTimer,
    gps_status: String,
    location: Option<Position>,
    exporter: Option<Exporter>,
    alerts: AlertGate,
    alert_sink: Box<dyn AlertSink>,
    recording: bool,
    filename: Option<PathBuf>,
    saved: bool,
    scans: u64,
    generations: u64,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("frequency", &self.config.frequency)
            .field("monitors", &self.monitors.len())
            .field("recording", &self.recording)
            .field("filename", &self.filename)
            .field("saved", &self.saved)
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[must_use]
    pub fn new(config: AppConfig, open_receiver: ReceiverFactory, alert_sink: Box<dyn AlertSink>) -> Self {
        let (bus, events) = event_bus(config.event_capacity);
        let frequencies = axis(&config, config.frequency);
        let alerts = AlertGate::new(config.alert_length_secs);

        Self {
            config,
            bus,
            events,
            monitors: MonitorSet::new(),
            frequencies,
            scanner: None,
            open_receiver,
            gps: None,
            gps_restart: RestartTimer::new(),
            gps_status: String::new(),
            location: None,
            exporter: None,
            alerts,
            alert_sink,
            recording: false,
            filename: None,
            saved: true,
            scans: 0,
            generations: 0,
        }
    }

    /// Handle for posting events to this controller.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.bus.clone()
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ---- Scanning ----

    /// Start the scanner if it is not already running.
    pub fn start_scan(&mut self) -> Result<(), ControlError> {
        if self.scanner.as_ref().is_some_and(Scanner::is_running) {
            return Ok(());
        }
        // Reap a scanner whose loop ended on an error
        if let Some(mut old) = self.scanner.take() {
            old.stop();
        }

        self.generations += 1;
        let factory = Arc::clone(&self.open_receiver);
        let scanner = Scanner::start(
            move || factory(),
            self.config.scan_settings(),
            self.generations,
            self.bus.clone(),
        )?;
        self.scanner = Some(scanner);
        Ok(())
    }

    /// Stop the scanner, close every open signal and clear the spectrum.
    pub fn stop_scan(&mut self) {
        if let Some(mut scanner) = self.scanner.take() {
            scanner.stop();
        }

        let timestamp = now_timestamp();
        let mut completed = self.monitors.set_recording(false, timestamp);
        completed.extend(self.monitors.stop_all(timestamp));
        self.recording = false;
        self.finish(completed, false);
        self.monitors.reset_spectrum();
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanner.as_ref().is_some_and(Scanner::is_running)
    }

    /// Whether an event tagged `generation` came from the scanner we hold.
    ///
    /// Anything queued by a scanner that has since been stopped or replaced is stale.
    fn is_current_scan(&self, generation: u64) -> bool {
        self.scanner.as_ref().is_some_and(|s| s.generation() == generation)
    }

    /// Switch recording on or off for every monitor.
    ///
    /// Turning it on starts the scanner. Turning it off closes open signals.
    pub fn set_recording(&mut self, recording: bool) -> Result<(), ControlError> {
        if recording {
            self.start_scan()?;
        }
        let completed = self.monitors.set_recording(recording, now_timestamp());
        self.recording = recording;
        self.finish(completed, false);
        info!("Recording {}", if recording { "started" } else { "stopped" });
        Ok(())
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Retune. Refused while any monitor exists.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<(), ControlError> {
        if !self.monitors.is_empty() {
            return Err(ControlError::FrequencyLocked);
        }
        self.config.frequency = frequency;
        self.frequencies = axis(&self.config, frequency);
        if let Some(scanner) = &mut self.scanner {
            scanner.set_frequency(frequency);
        }
        Ok(())
    }

    // ---- Monitors ----

    /// Add a monitor. It joins the current recording state.
    pub fn add_monitor(&mut self, frequency: f64, threshold: f32, alert: bool) -> MonitorId {
        let (low, high) = (self.frequencies.first(), self.frequencies.last());
        if low.zip(high).is_some_and(|(l, h)| frequency < *l || frequency > *h) {
            warn!("Monitor at {frequency:.4} MHz is outside the scanned band");
        }

        let mut monitor = Monitor::new(frequency, threshold);
        monitor.set_alert(alert);
        if self.recording {
            monitor.set_recording(true, now_timestamp());
        }
        let id = self.monitors.add(monitor);
        self.saved = false;
        info!("Added monitor at {frequency:.4} MHz, threshold {threshold:.1} dB");
        id
    }

    pub fn remove_monitor(&mut self, id: MonitorId) -> Result<Monitor, ControlError> {
        let monitor = self.monitors.remove(id).ok_or(ControlError::UnknownMonitor(id))?;
        self.saved = false;
        info!("Removed monitor at {:.4} MHz", monitor.frequency());
        Ok(monitor)
    }

    /// Change a monitor's settings.
    pub fn update_monitor(&mut self, id: MonitorId, f: impl FnOnce(&mut Monitor)) -> Result<(), ControlError> {
        let monitor = self.monitors.get_mut(id).ok_or(ControlError::UnknownMonitor(id))?;
        f(monitor);
        self.saved = false;
        Ok(())
    }

    #[must_use]
    pub fn monitors(&self) -> &MonitorSet {
        &self.monitors
    }

    /// Discard the signal history of every monitor.
    pub fn clear(&mut self) {
        if !self.monitors.has_recordings() {
            return;
        }
        self.monitors.clear_recordings();
        self.saved = false;
    }

    // ---- Files ----

    /// Replace the session with the contents of `path`.
    ///
    /// Nothing changes unless the whole file loads.
    pub fn open(&mut self, path: &Path) -> Result<(), ControlError> {
        if self.is_scanning() {
            return Err(ControlError::Scanning);
        }
        let session = recording::load(path).map_err(|e| ControlError::recording(path, e))?;

        self.config.frequency = session.frequency;
        self.config.gain = session.gain;
        self.config.calibration = session.calibration;
        self.frequencies = axis(&self.config, session.frequency);
        self.monitors = MonitorSet::from_monitors(session.monitors);
        self.recording = false;
        self.filename = Some(path.to_path_buf());
        self.saved = true;

        info!(
            "Opened {} with {} monitors at {:.4} MHz",
            path.display(),
            self.monitors.len(),
            self.config.frequency
        );
        Ok(())
    }

    /// Save to `path`, or to the file last opened or saved.
    pub fn save(&mut self, path: Option<&Path>) -> Result<(), ControlError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.filename.clone())
            .ok_or(ControlError::NoFilename)?;

        recording::save(
            &path,
            self.config.frequency,
            self.config.gain,
            self.config.calibration,
            self.monitors.monitors(),
        )
        .map_err(|e| ControlError::recording(&path, e))?;

        info!("Saved {}", path.display());
        self.filename = Some(path);
        self.saved = true;
        Ok(())
    }

    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Window-style title: app name, file name, `*` when unsaved.
    #[must_use]
    pub fn title(&self) -> String {
        let mut title = APP_NAME.to_string();
        if let Some(name) = self.filename.as_deref().and_then(Path::file_name) {
            title.push_str(" - ");
            title.push_str(&name.to_string_lossy());
        }
        if !self.saved {
            title.push('*');
        }
        title
    }

    // ---- Spectrum ----

    /// Frequency axis in MHz and the smoothed levels in dB.
    ///
    /// Levels are empty until the first scan arrives.
    #[must_use]
    pub fn spectrum(&self) -> (Arc<[f64]>, &[f32]) {
        (Arc::clone(&self.frequencies), self.monitors.smoothed())
    }

    /// Strongest smoothed bin as (MHz, dB).
    #[must_use]
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.monitors
            .smoothed()
            .iter()
            .zip(self.frequencies.iter())
            .max_by(|a, b| a.0.total_cmp(b.0))
            .map(|(level, freq)| (*freq, *level))
    }

    // ---- GPS ----

    /// Start the position source if it is enabled and not running.
    pub fn start_gps(&mut self) {
        if self.gps.is_some() || !self.config.gps.enabled {
            return;
        }
        self.gps_status = "Starting GPS...".to_string();
        match PositionSource::start(self.config.gps_settings(), self.bus.clone()) {
            Ok(source) => self.gps = Some(source),
            Err(e) => {
                error!("Failed to start GPS thread: {e}");
                self.gps_status = format!("GPS failed: {e}");
            }
        }
    }

    pub fn stop_gps(&mut self) {
        if let Some(mut gps) = self.gps.take() {
            gps.stop();
        }
    }

    /// Tear the position source down and start it again after the retry delay.
    fn restart_gps(&mut self) {
        self.stop_gps();
        self.gps_restart.schedule(self.config.gps_retry(), self.bus.clone());
    }

    /// Last position fix or GPS message.
    #[must_use]
    pub fn gps_status(&self) -> &str {
        &self.gps_status
    }

    #[must_use]
    pub fn location(&self) -> Option<Position> {
        self.location
    }

    // ---- Export ----

    /// Connect to the export server if one is configured.
    pub fn start_exporter(&mut self) {
        if self.exporter.is_some() || !self.config.server.enabled {
            return;
        }
        self.exporter = Some(Exporter::spawn(self.config.exporter_config(), self.bus.clone()));
    }

    // ---- Events ----

    /// React to one event.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::ScanData(sample) => {
                if self.is_current_scan(sample.generation) {
                    self.on_scan_data(&sample);
                } else {
                    debug!("Discarded scan from stopped scanner #{}", sample.generation);
                }
            }
            Event::ScanError { generation, message } => {
                if self.is_current_scan(generation) {
                    error!("Scan failed: {message}");
                    self.stop_scan();
                } else {
                    debug!("Ignored error from stopped scanner #{generation}: {message}");
                }
            }
            Event::GpsLoc(position) => {
                self.location = Some(position);
                self.gps_status = position.to_string();
            }
            Event::GpsWarn(msg) => {
                warn!("GPS: {msg}");
                self.gps_status = msg;
            }
            Event::GpsError(msg) | Event::GpsTimeout(msg) => {
                warn!("GPS: {msg}, restarting in {:?}", self.config.gps_retry());
                self.gps_status = msg;
                self.restart_gps();
            }
            Event::GpsRestart => {
                self.gps_restart.fired();
                self.start_gps();
            }
            Event::ServerError(msg) => {
                error!("Export disabled: {msg}");
                self.exporter = None;
            }
            Event::MonAlert { frequency, timestamp } => {
                if self.alerts.try_fire(timestamp) {
                    self.alert_sink.play(frequency);
                } else {
                    debug!("Alert for {frequency:.4} MHz suppressed");
                }
            }
            Event::Changed => self.saved = false,
        }
    }

    fn on_scan_data(&mut self, sample: &SpectrumSample) {
        self.scans += 1;
        self.frequencies = Arc::clone(&sample.frequencies);
        let dispatch = self.monitors.dispatch(sample, self.location);
        self.finish(dispatch.completed, true);
    }

    /// Export completed signals, queue alerts and flag the session as changed.
    ///
    /// Signals closed by a recording toggle or stop never alert.
    fn finish(&mut self, completed: Vec<Completed>, alert: bool) {
        if completed.is_empty() {
            return;
        }
        for done in &completed {
            debug!(
                "Signal on {:.4} MHz: {:.1}s",
                done.frequency,
                done.signal.duration()
            );
            if let Some(exporter) = &mut self.exporter {
                exporter.send(ExportRecord::new(done.frequency, &done.signal));
            }
            if alert && done.alert {
                self.emit(Event::MonAlert {
                    frequency: done.frequency,
                    timestamp: done.signal.end,
                });
            }
        }
        self.emit(Event::Changed);
    }

    /// Queue an event for ourselves, handling it now if the queue is unavailable.
    fn emit(&mut self, event: Event) {
        if self.bus.post(event.clone()).is_err() {
            self.handle_event(event);
        }
    }

    /// Handle every queued event. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Drain events until `shutdown` is cancelled, then shut everything down.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut status = tokio::time::interval(STATUS_INTERVAL);
        status.tick().await;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    // The controller holds a sender, so the bus never closes
                    let Some(event) = event else { break };
                    self.handle_event(event);
                }
                _ = status.tick() => self.log_status(),
                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Stop every worker. Open signals are closed at the current time.
    pub fn shutdown(&mut self) {
        self.stop_scan();
        self.gps_restart.cancel();
        self.stop_gps();
        if let Some(mut exporter) = self.exporter.take() {
            exporter.disable();
        }
        // Completed signals from the forced close are already recorded
        while self.events.try_recv().is_some() {}
    }

    pub fn log_status(&self) {
        let now = now_timestamp();
        info!(
            "{} scans, recording {}, GPS: {}",
            self.scans,
            if self.recording { "on" } else { "off" },
            if self.gps_status.is_empty() { "-" } else { &self.gps_status }
        );
        if let Some((freq, level)) = self.peak() {
            info!("Peak {level:.1} dB at {freq:.4} MHz");
        }
        for monitor in self.monitors.iter() {
            info!(
                "  {:.4} MHz: {} signals, {:.1}% active{}",
                monitor.frequency(),
                monitor.signals().len(),
                monitor.activity(now) * 100.0,
                if monitor.enabled() { "" } else { " (disabled)" }
            );
        }
    }
}

/// Frequency axis for the configured bins and sample rate.
fn axis(config: &AppConfig, frequency: f64) -> Arc<[f64]> {
    Estimator::new(config.bins, f64::from(config.sample_rate))
        .frequencies(frequency)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_sink::RecordingSink;
    use crate::sdr::receiver::{Receiver, ReceiverError};
    use crate::sdr::GainMode;
    use num_complex::Complex;

    /// Returns silence forever.
    struct SilentReceiver;

    impl Receiver for SilentReceiver {
        fn set_frequency(&mut self, _hz: u32) -> Result<(), ReceiverError> {
            Ok(())
        }

        fn set_gain(&mut self, _gain: GainMode) -> Result<(), ReceiverError> {
            Ok(())
        }

        fn set_freq_correction(&mut self, _ppm: i32) -> Result<(), ReceiverError> {
            Ok(())
        }

        fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>, ReceiverError> {
            Ok(vec![Complex::new(0.0, 0.0); count])
        }

        fn gains(&self) -> Vec<f32> {
            vec![0.0]
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            frequency: 100.0,
            bins: 16,
            sample_rate: 1_600_000,
            samples_per_scan: 64,
            // One scan at start, then quiet for the rest of the test
            scan_interval_ms: 3_600_000,
            ..AppConfig::default()
        }
    }

    fn controller(config: AppConfig) -> (Controller, RecordingSink) {
        let sink = RecordingSink::default();
        let factory: ReceiverFactory = Arc::new(|| Ok(Box::new(SilentReceiver) as Box<dyn Receiver>));
        (Controller::new(config, factory, Box::new(sink.clone())), sink)
    }

    /// Start recording and consume the single scan the scanner posts.
    async fn start_recording(controller: &mut Controller) {
        controller.set_recording(true).unwrap();
        for _ in 0..200 {
            controller.process_pending();
            if controller.scans > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scanner produced no data");
    }

    /// A scan with `level` at the centre bin (100.0 MHz) and silence elsewhere.
    fn sample(controller: &Controller, level: f32, timestamp: f64) -> Event {
        let (frequencies, _) = controller.spectrum();
        let mut levels = vec![-150.0; frequencies.len()];
        levels[frequencies.len() / 2] = level;
        Event::ScanData(SpectrumSample {
            levels,
            frequencies,
            timestamp,
            generation: controller.scanner.as_ref().map_or(0, Scanner::generation),
        })
    }

    fn feed(controller: &mut Controller, level: f32, timestamp: f64) {
        let event = sample(controller, level, timestamp);
        controller.handle_event(event);
        controller.process_pending();
    }

    #[tokio::test]
    async fn test_signal_detected_and_marks_unsaved() {
        let (mut controller, _sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, false);
        controller.save(Some(&tempfile::tempdir().unwrap().path().join("a.rfmon"))).unwrap();
        assert!(controller.is_saved());

        start_recording(&mut controller).await;
        feed(&mut controller, -20.0, 1000.0);
        feed(&mut controller, -30.0, 1001.0);
        assert!(controller.is_saved());
        feed(&mut controller, -90.0, 1002.0);

        let monitor = controller.monitors().get(id).unwrap();
        assert_eq!(monitor.signals().len(), 1);
        assert_eq!(monitor.signals()[0].start, 1000.0);
        assert_eq!(monitor.signals()[0].end, 1002.0);
        assert!(!controller.is_saved());
        assert!(controller.title().ends_with("a.rfmon*"));
    }

    #[tokio::test]
    async fn test_alerts_debounced() {
        let (mut controller, sink) = controller(test_config());
        controller.add_monitor(100.0, -50.0, true);
        start_recording(&mut controller).await;

        for (start, end) in [(1000.0, 1001.0), (1002.0, 1003.0), (1010.0, 1011.0)] {
            feed(&mut controller, 0.0, start);
            feed(&mut controller, -100.0, end);
        }

        assert_eq!(*sink.played.lock().unwrap(), vec![100.0, 100.0]);
    }

    #[tokio::test]
    async fn test_recording_off_closes_without_alert() {
        let (mut controller, sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, true);
        start_recording(&mut controller).await;
        feed(&mut controller, 0.0, 1000.0);

        controller.set_recording(false).unwrap();
        controller.process_pending();

        let monitor = controller.monitors().get(id).unwrap();
        assert_eq!(monitor.signals().len(), 1);
        assert!(monitor.signals()[0].end >= 1000.0);
        assert!(monitor.current_signal().is_none());
        assert_eq!(monitor.periods().len(), 1);
        assert!(monitor.periods()[0].end.is_some());
        assert!(sink.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_closes_signals_and_clears_spectrum() {
        let (mut controller, _sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, false);
        start_recording(&mut controller).await;
        feed(&mut controller, 0.0, 1000.0);
        assert!(!controller.spectrum().1.is_empty());

        controller.stop_scan();
        assert!(!controller.is_scanning());
        assert!(!controller.is_recording());
        assert!(controller.spectrum().1.is_empty());
        assert_eq!(controller.monitors().get(id).unwrap().signals().len(), 1);

        // Nothing further arrives once stopped
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.process_pending();
        assert_eq!(controller.scans, 2);
    }

    #[tokio::test]
    async fn test_queued_scans_discarded_after_stop() {
        let (mut controller, _sink) = controller(AppConfig {
            scan_interval_ms: 5,
            ..test_config()
        });
        controller.start_scan().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.stop_scan();
        assert!(controller.process_pending() > 0);
        assert_eq!(controller.scans, 0);
        assert!(controller.spectrum().1.is_empty());
    }

    #[tokio::test]
    async fn test_stale_scan_error_spares_restarted_scanner() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Fails on its first read.
        struct BrokenReceiver;

        impl Receiver for BrokenReceiver {
            fn set_frequency(&mut self, _hz: u32) -> Result<(), ReceiverError> {
                Ok(())
            }

            fn set_gain(&mut self, _gain: GainMode) -> Result<(), ReceiverError> {
                Ok(())
            }

            fn set_freq_correction(&mut self, _ppm: i32) -> Result<(), ReceiverError> {
                Ok(())
            }

            fn read_samples(&mut self, _count: usize) -> Result<Vec<Complex<f32>>, ReceiverError> {
                Err(ReceiverError::Read("device unplugged".to_string()))
            }

            fn gains(&self) -> Vec<f32> {
                vec![0.0]
            }
        }

        let opens = Arc::new(AtomicUsize::new(0));
        let factory: ReceiverFactory = Arc::new(move || {
            if opens.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Box::new(BrokenReceiver) as Box<dyn Receiver>)
            } else {
                Ok(Box::new(SilentReceiver) as Box<dyn Receiver>)
            }
        });
        let mut controller = Controller::new(test_config(), factory, Box::new(RecordingSink::default()));
        let id = controller.add_monitor(100.0, -50.0, false);

        // The first scanner dies; its error is still queued when the caller retries
        controller.start_scan().unwrap();
        for _ in 0..200 {
            if !controller.is_scanning() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!controller.is_scanning());
        start_recording(&mut controller).await;

        assert!(controller.is_scanning());
        assert!(controller.is_recording());

        feed(&mut controller, 0.0, 1000.0);
        assert!(controller.monitors().get(id).unwrap().current_signal().is_some());
        controller.shutdown();
    }

    #[tokio::test]
    async fn test_frequency_locked_while_monitors_exist() {
        let (mut controller, _sink) = controller(test_config());
        controller.set_frequency(433.92).unwrap();
        assert!((controller.spectrum().0[8] - 433.92).abs() < 1e-9);

        let id = controller.add_monitor(433.92, -50.0, false);
        assert!(matches!(controller.set_frequency(100.0), Err(ControlError::FrequencyLocked)));

        controller.remove_monitor(id).unwrap();
        assert!(matches!(controller.remove_monitor(id), Err(ControlError::UnknownMonitor(_))));
        controller.set_frequency(100.0).unwrap();
    }

    #[tokio::test]
    async fn test_save_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.rfmon");

        let (mut first, _sink) = controller(test_config());
        let id = first.add_monitor(100.0, -50.0, true);
        first.add_monitor(100.1, -60.0, false);
        first.update_monitor(id, |m| m.set_calibration(1.5)).unwrap();
        start_recording(&mut first).await;
        feed(&mut first, 0.0, 1000.0);
        feed(&mut first, -100.0, 1004.0);
        first.set_recording(false).unwrap();
        assert!(matches!(first.save(None), Err(ControlError::NoFilename)));
        first.save(Some(&path)).unwrap();
        assert!(first.is_saved());

        let (mut second, _sink) = controller(AppConfig {
            frequency: 50.0,
            ..test_config()
        });
        second.open(&path).unwrap();

        assert!(second.is_saved());
        assert_eq!(second.config().frequency, 100.0);
        assert_eq!(second.title(), format!("{APP_NAME} - session.rfmon"));
        let restored: Vec<_> = second.monitors().iter().collect();
        let original: Vec<_> = first.monitors().iter().collect();
        assert_eq!(restored.len(), 2);
        for (a, b) in restored.iter().zip(&original) {
            assert_eq!(a.frequency(), b.frequency());
            assert_eq!(a.threshold(), b.threshold());
            assert_eq!(a.calibration(), b.calibration());
            assert_eq!(a.alert(), b.alert());
            assert_eq!(a.signals(), b.signals());
            assert_eq!(a.periods(), b.periods());
        }
    }

    #[tokio::test]
    async fn test_corrupt_open_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rfmon");
        std::fs::write(&path, "{\"Version\": 1, \"Frequency\": ").unwrap();

        let (mut controller, _sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, false);

        let err = controller.open(&path).unwrap_err();
        assert!(err.to_string().contains("broken.rfmon"));
        assert_eq!(controller.monitors().len(), 1);
        assert!(controller.monitors().get(id).is_some());
        assert_eq!(controller.config().frequency, 100.0);
        assert!(controller.filename().is_none());
    }

    #[tokio::test]
    async fn test_open_refused_while_scanning() {
        let (mut controller, _sink) = controller(test_config());
        controller.start_scan().unwrap();
        assert!(matches!(
            controller.open(Path::new("missing.rfmon")),
            Err(ControlError::Scanning)
        ));
        controller.shutdown();
    }

    #[tokio::test]
    async fn test_clear_discards_history() {
        let (mut controller, _sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, false);
        start_recording(&mut controller).await;
        feed(&mut controller, 0.0, 1000.0);
        feed(&mut controller, -100.0, 1001.0);
        controller.save(Some(&tempfile::tempdir().unwrap().path().join("c.rfmon"))).unwrap();

        controller.clear();
        assert!(controller.monitors().get(id).unwrap().signals().is_empty());
        assert!(!controller.monitors().has_recordings());
        assert!(!controller.is_saved());
    }

    #[tokio::test]
    async fn test_gps_location_and_status() {
        let (mut controller, _sink) = controller(test_config());
        let id = controller.add_monitor(100.0, -50.0, false);
        start_recording(&mut controller).await;

        controller.handle_event(Event::GpsWarn("No fix".to_string()));
        assert_eq!(controller.gps_status(), "No fix");

        controller.handle_event(Event::GpsLoc(Position::new(51.5, -0.1)));
        assert_eq!(controller.gps_status(), " 51.50000,  -0.10000");
        feed(&mut controller, 0.0, 1000.0);
        feed(&mut controller, -100.0, 1001.0);

        let signal = controller.monitors().get(id).unwrap().signals()[0];
        assert_eq!(signal.position, Some(Position::new(51.5, -0.1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_restart_after_retry_delay() {
        let (mut controller, _sink) = controller(test_config());

        controller.handle_event(Event::GpsTimeout("GPS timed out".to_string()));
        controller.handle_event(Event::GpsError("Connection refused".to_string()));
        assert_eq!(controller.gps_status(), "Connection refused");
        assert!(controller.gps_restart.is_pending());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(controller.process_pending(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(controller.process_pending(), 1);
        assert!(!controller.gps_restart.is_pending());
        // Disabled in config, so nothing was started
        assert!(controller.gps.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.process_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_restart_delivered_with_scan_backlog() {
        let (mut controller, _sink) = controller(AppConfig {
            event_capacity: 1,
            ..test_config()
        });
        let backlog = sample(&controller, -150.0, 1000.0);
        controller.sender().post(backlog.clone()).unwrap();
        assert!(controller.sender().post(backlog).is_err());

        controller.handle_event(Event::GpsTimeout("GPS timed out".to_string()));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(controller.process_pending(), 2);
        assert!(!controller.gps_restart.is_pending());
    }

    /// Collect every connection made to `listener` within `wait`.
    fn accept_for(listener: &std::net::TcpListener, wait: Duration) -> Vec<std::net::TcpStream> {
        let deadline = std::time::Instant::now() + wait;
        let mut accepted = Vec::new();
        while std::time::Instant::now() < deadline {
            match listener.accept() {
                Ok((socket, _)) => accepted.push(socket),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
        accepted
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_gps_failures_restart_once() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let mut config = test_config();
        config.gps.enabled = true;
        config.gps.address = listener.local_addr().unwrap().to_string();

        let (mut controller, _sink) = controller(config);
        controller.start_gps();
        let first = accept_for(&listener, Duration::from_secs(1));
        assert_eq!(first.len(), 1);

        controller.handle_event(Event::GpsError("GPS connection closed".to_string()));
        controller.handle_event(Event::GpsTimeout("GPS timed out".to_string()));
        assert!(controller.gps.is_none());
        assert!(controller.gps_restart.is_pending());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(controller.process_pending(), 1);
        assert!(controller.gps.as_ref().is_some_and(PositionSource::is_running));

        let restarted = accept_for(&listener, Duration::from_secs(1));
        assert_eq!(restarted.len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.process_pending(), 0);
        assert!(accept_for(&listener, Duration::from_millis(200)).is_empty());
        controller.shutdown();
    }

    #[tokio::test]
    async fn test_completed_signals_exported() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.server.enabled = true;
        config.server.address = listener.local_addr().unwrap().to_string();

        let (mut controller, _sink) = controller(config);
        controller.start_exporter();
        controller.add_monitor(100.0, -50.0, false);
        start_recording(&mut controller).await;
        feed(&mut controller, 0.0, 1000.0);
        feed(&mut controller, -100.0, 1003.0);

        let (socket, _) = listener.accept().await.unwrap();
        let line = BufReader::new(socket).lines().next_line().await.unwrap().unwrap();
        let record: ExportRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(record.frequency, 100.0);
        assert_eq!(record.start, 1000.0);
        assert_eq!(record.end, 1003.0);

        controller.handle_event(Event::ServerError("gone".to_string()));
        assert!(controller.exporter.is_none());
        feed(&mut controller, 0.0, 1004.0);
        feed(&mut controller, -100.0, 1005.0);
    }
}
