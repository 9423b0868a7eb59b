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

//! Spectrum scanner.
//!
//! Runs the receiver on a dedicated thread. Once per scan interval it reads a
//! block of samples, estimates the power spectrum and posts a
//! [`Event::ScanData`]. A receiver failure posts [`Event::ScanError`] and ends
//! the thread; restarting is up to the caller. Every event carries the
//! generation the scanner was started with, so the consumer can discard
//! anything a previous run left in the queue.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rfmon_core::{now_timestamp, BusError, Event, EventSender, SpectrumSample};
use thiserror::Error;

use super::estimator::{to_db, Estimator};
use super::receiver::{Receiver, ReceiverError};
use super::rtlsdr_source::GainMode;

/// How long to wait for the receiver to open and accept its settings.
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a timed-out start waits for the abandoned thread to let go of the receiver.
const ABANDON_GRACE: Duration = Duration::from_secs(5);

/// Errors starting the scanner.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error("receiver initialization timed out")]
    InitTimeout,

    #[error("failed to spawn scanner thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("frequency {0} MHz is out of range")]
    FrequencyOutOfRange(f64),
}

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Centre frequency in MHz
    pub frequency: f64,
    pub gain: GainMode,
    /// Frequency correction in ppm
    pub calibration: f32,
    /// Number of spectrum bins
    pub bins: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples read per scan
    pub samples_per_scan: usize,
    /// Time between scans
    pub interval: Duration,
}

enum Command {
    Retune(f64),
    Stop,
}

/// Handle to a running scanner thread.
#[derive(Debug)]
pub struct Scanner {
    commands: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    frequency: f64,
    generation: u64,
}

/// Convert MHz to whole Hz for the tuner.
pub fn to_hz(mhz: f64) -> Result<u32, ScanError> {
    let hz = (mhz * 1e6).round();
    if !(0.0..=f64::from(u32::MAX)).contains(&hz) {
        return Err(ScanError::FrequencyOutOfRange(mhz));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked above")]
    Ok(hz as u32)
}

impl Scanner {
    /// Open the receiver on a new thread and start scanning.
    ///
    /// Returns once the receiver is open and configured, or with the error
    /// that prevented it. Events are tagged with `generation`.
    pub fn start<F>(open: F, settings: ScanSettings, generation: u64, bus: EventSender) -> Result<Self, ScanError>
    where
        F: FnOnce() -> Result<Box<dyn Receiver>, ReceiverError> + Send + 'static,
    {
        Self::start_within(open, settings, generation, bus, INIT_TIMEOUT)
    }

    fn start_within<F>(
        open: F,
        settings: ScanSettings,
        generation: u64,
        bus: EventSender,
        init_timeout: Duration,
    ) -> Result<Self, ScanError>
    where
        F: FnOnce() -> Result<Box<dyn Receiver>, ReceiverError> + Send + 'static,
    {
        let hz = to_hz(settings.frequency)?;
        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), ReceiverError>>();
        let frequency = settings.frequency;

        let handle = std::thread::Builder::new()
            .name("scanner".to_string())
            .spawn(move || {
                let mut receiver = match open().and_then(|mut r| {
                    configure(r.as_mut(), hz, &settings)?;
                    Ok(r)
                }) {
                    Ok(receiver) => receiver,
                    Err(e) => {
                        error!("Failed to start receiver: {e}");
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                if init_tx.send(Ok(())).is_err() {
                    warn!("Scanner start was abandoned, closing receiver");
                    return;
                }

                scan_loop(receiver.as_mut(), &settings, generation, &command_rx, &bus);
                info!("Scanner thread exiting, closing receiver");
            })?;

        match init_rx.recv_timeout(init_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e.into());
            }
            Err(_) => {
                error!("Receiver did not open within {init_timeout:?}");
                let _ = command_tx.send(Command::Stop);
                drop(init_rx);
                abandon(handle);
                return Err(ScanError::InitTimeout);
            }
        }

        info!("Scanner #{generation} started at {frequency:.4} MHz");
        Ok(Self {
            commands: command_tx,
            handle: Some(handle),
            frequency,
            generation,
        })
    }

    /// Tag carried by every event this scanner posts.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Retune the running receiver. Takes effect from the next scan.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
        if self.commands.send(Command::Retune(frequency)).is_err() {
            debug!("Scanner thread already stopped, retune ignored");
        }
    }

    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Whether the scan thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop scanning and wait for the thread to exit.
    ///
    /// No events are posted once this returns. Calling it again does nothing.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Stopping scanner...");
        let _ = self.commands.send(Command::Stop);
        match handle.join() {
            Ok(()) => info!("Scanner thread stopped"),
            Err(_) => error!("Scanner thread panicked"),
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait a bounded time for a thread whose start timed out to release the receiver.
fn abandon(handle: JoinHandle<()>) {
    let deadline = Instant::now() + ABANDON_GRACE;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!("Scanner thread is stuck opening the receiver, leaving it behind");
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        error!("Scanner thread panicked");
    }
}

fn post_error(bus: &EventSender, generation: u64, message: String) {
    if bus.post(Event::ScanError { generation, message }).is_err() {
        debug!("Event bus closed, scan error not delivered");
    }
}

fn configure(receiver: &mut dyn Receiver, hz: u32, settings: &ScanSettings) -> Result<(), ReceiverError> {
    #[allow(clippy::cast_possible_truncation, reason = "ppm corrections are small")]
    receiver.set_freq_correction(settings.calibration.round() as i32)?;
    receiver.set_frequency(hz)?;
    receiver.set_gain(settings.gain)?;
    Ok(())
}

fn scan_loop(
    receiver: &mut dyn Receiver,
    settings: &ScanSettings,
    generation: u64,
    commands: &mpsc::Receiver<Command>,
    bus: &EventSender,
) {
    let estimator = Estimator::new(settings.bins, f64::from(settings.sample_rate));
    let mut frequencies: Arc<[f64]> = estimator.frequencies(settings.frequency).into();
    let mut scans = 0u64;
    let mut dropped = 0u64;

    info!(
        "Scan loop running: {} bins, {:.3} MHz sample rate, {} samples every {:?}",
        estimator.bins(),
        f64::from(settings.sample_rate) / 1e6,
        settings.samples_per_scan,
        settings.interval
    );

    // A stop sent while the receiver was still opening
    if matches!(commands.try_recv(), Ok(Command::Stop)) {
        return;
    }

    loop {
        let started = Instant::now();

        match receiver.read_samples(settings.samples_per_scan) {
            Ok(samples) => {
                let timestamp = now_timestamp();
                let levels = estimator.estimate(&samples).into_iter().map(to_db).collect();
                scans += 1;

                match bus.post(Event::ScanData(SpectrumSample {
                    levels,
                    frequencies: Arc::clone(&frequencies),
                    timestamp,
                    generation,
                })) {
                    Ok(()) => {}
                    Err(BusError::Full(_)) => {
                        dropped += 1;
                        if dropped % 100 == 1 {
                            warn!("Control loop is behind, dropped {dropped} scans so far");
                        }
                    }
                    Err(BusError::Closed) => {
                        info!("Event bus closed, stopping scan loop");
                        return;
                    }
                }

                if scans % 100 == 0 {
                    debug!("Scan #{scans} posted ({} samples)", samples.len());
                }
            }
            Err(e) => {
                error!("Receiver read error after {scans} scans: {e}");
                post_error(bus, generation, e.to_string());
                return;
            }
        }

        // Wait out the rest of the interval while staying responsive to commands
        let deadline = started + settings.interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match commands.recv_timeout(remaining) {
                Ok(Command::Retune(frequency)) => {
                    let result = to_hz(frequency)
                        .map_err(|e| ReceiverError::Config(e.to_string()))
                        .and_then(|hz| receiver.set_frequency(hz));
                    if let Err(e) = result {
                        error!("Retune to {frequency:.4} MHz failed: {e}");
                        post_error(bus, generation, e.to_string());
                        return;
                    }
                    info!("Retuned to {frequency:.4} MHz");
                    frequencies = estimator.frequencies(frequency).into();
                }
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
    }
}
