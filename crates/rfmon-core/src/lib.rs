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

//! Signal detection core for RF spectrum monitoring.
//!
//! This library holds everything that runs on the single control thread of an
//! RF monitor, independent of receiver hardware, position sources or network
//! transports:
//!
//! - **Signals**: detected intervals, recording periods, geotags
//! - **Monitors**: per-frequency detection state machines
//! - **Monitor sets**: routing of scans to monitors and spectrum smoothing
//! - **Alerts**: debouncing of audible alerts across monitors
//! - **Events**: the message bus workers use to reach the control loop
//! - **Recordings**: `.rfmon` session files and export records
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rfmon_core::{Monitor, MonitorSet, SpectrumSample};
//!
//! let mut monitors = MonitorSet::new();
//! let mut monitor = Monitor::new(100.0, -40.0);
//! monitor.set_recording(true, 0.0);
//! monitors.add(monitor);
//!
//! let frequencies: Arc<[f64]> = Arc::from(vec![99.9, 100.0, 100.1]);
//! for (timestamp, level) in [(1.0, -20.0), (2.0, -20.0), (3.0, -70.0)] {
//!     let sample = SpectrumSample {
//!         levels: vec![-90.0, level, -90.0],
//!         frequencies: Arc::clone(&frequencies),
//!         timestamp,
//!         generation: 1,
//!     };
//!     let dispatch = monitors.dispatch(&sample, None);
//!     for completed in dispatch.completed {
//!         println!("{} MHz: {} -> {}", completed.frequency, completed.signal.start, completed.signal.end);
//!     }
//! }
//! ```

pub mod alert;
pub mod event;
pub mod monitor;
pub mod monitor_set;
pub mod recording;
pub mod signal;

pub use alert::{AlertGate, ALERT_LENGTH};
pub use event::{event_bus, BusError, Event, EventReceiver, EventSender, SpectrumSample};
pub use monitor::{Monitor, MonitorId};
pub use monitor_set::{nearest_bin, Completed, Dispatch, MonitorSet};
pub use recording::{ExportRecord, RecordingError, Session};
pub use signal::{now_timestamp, OpenSignal, Period, Position, Signal};
