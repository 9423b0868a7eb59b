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

//! Headless RF signal monitor.
//!
//! Scans a band with an SDR receiver and records, per monitored frequency,
//! when a signal rose above its threshold and where the station was. The
//! monitoring state machine lives in `rfmon-core`; this crate adds the
//! receiver, scanner, GPS and export workers and the [`controller`] that ties
//! them together.

pub mod alert_sink;
pub mod config;
pub mod controller;
pub mod gps;
pub mod network;
pub mod sdr;
