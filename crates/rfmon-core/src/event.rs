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

//! Events crossing from worker threads to the control loop.
//!
//! Producers (scanner, position source, exporter) only build immutable
//! [`Event`] values and post them; the single consumer drains them in arrival
//! order. Posting never blocks. Only spectrum scans are bounded: once
//! `capacity` scans are waiting, further scans are refused until the consumer
//! catches up. Every other event is always queued, since errors and restarts
//! are terminal for the worker that posts them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::signal::Position;

/// One scan worth of spectrum data.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumSample {
    /// Power per bin in dB, parallel to `frequencies`.
    pub levels: Vec<f32>,
    /// Bin centre frequencies in MHz, ascending.
    pub frequencies: Arc<[f64]>,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
    /// Scanner run that produced this scan.
    pub generation: u64,
}

/// Everything the control loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A completed scan.
    ScanData(SpectrumSample),
    /// The receiver failed; the scanner run `generation` has stopped.
    ScanError { generation: u64, message: String },
    /// A new position fix.
    GpsLoc(Position),
    /// The position source could not be acquired.
    GpsError(String),
    /// A fix is available but of poor quality.
    GpsWarn(String),
    /// No fix arrived within the timeout window.
    GpsTimeout(String),
    /// The delayed position source restart is due.
    GpsRestart,
    /// The export transport failed.
    ServerError(String),
    /// A monitor with alerts enabled completed a signal.
    MonAlert { frequency: f64, timestamp: f64 },
    /// Monitor state changed and the session needs saving.
    Changed,
}

impl Event {
    /// Short tag used in logs.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ScanData(_) => "SCAN_DATA",
            Self::ScanError { .. } => "SCAN_ERROR",
            Self::GpsLoc(_) => "GPS_LOC",
            Self::GpsError(_) => "GPS_ERROR",
            Self::GpsWarn(_) => "GPS_WARN",
            Self::GpsTimeout(_) => "GPS_TIMEOUT",
            Self::GpsRestart => "GPS_RESTART",
            Self::ServerError(_) => "SERVER_ERROR",
            Self::MonAlert { .. } => "MON_ALERT",
            Self::Changed => "CHANGED",
        }
    }
}

/// Errors returned when posting an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("event queue full, dropped {0}")]
    Full(&'static str),

    #[error("event queue closed")]
    Closed,
}

/// Create a bus holding at most `capacity` undelivered scans.
#[must_use]
pub fn event_bus(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            backlog: Arc::clone(&backlog),
            capacity: capacity.max(1),
        },
        EventReceiver { rx, backlog },
    )
}

/// Producer handle. Cheap to clone, safe to use from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
    backlog: Arc<AtomicUsize>,
    capacity: usize,
}

impl EventSender {
    /// Queue an event without blocking.
    ///
    /// Fails with [`BusError::Full`] only for a scan posted while `capacity`
    /// scans are still waiting.
    pub fn post(&self, event: Event) -> Result<(), BusError> {
        let is_scan = matches!(event, Event::ScanData(_));
        if is_scan {
            let reserved = self
                .backlog
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.capacity).then_some(n + 1));
            if reserved.is_err() {
                return Err(BusError::Full(event.tag()));
            }
        }
        self.tx.send(event).map_err(|_| {
            if is_scan {
                self.backlog.fetch_sub(1, Ordering::AcqRel);
            }
            BusError::Closed
        })
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer handle owned by the control loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    backlog: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Wait for the next event. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.rx.recv().await;
        self.delivered(event)
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        let event = self.rx.try_recv().ok();
        self.delivered(event)
    }

    fn delivered(&self, event: Option<Event>) -> Option<Event> {
        if matches!(event, Some(Event::ScanData(_))) {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }
}
