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

//! Synthetic receiver for running without hardware.
//!
//! Produces low-level noise plus a few carriers that key on and off on fixed
//! schedules, so monitors placed on them open and close signals regularly.

use std::f32::consts::TAU;
use std::time::Instant;

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::receiver::{Receiver, ReceiverError};
use super::rtlsdr_source::GainMode;

const NOISE_AMPLITUDE: f32 = 0.05;

/// Manual gain at which samples are generated unscaled, in dB.
const REFERENCE_GAIN_DB: f32 = 29.7;

/// A carrier that is on for `on_secs` out of every `period_secs`.
#[derive(Debug, Clone, Copy)]
struct Burst {
    offset_hz: f32,
    amplitude: f32,
    on_secs: f32,
    period_secs: f32,
}

const BURSTS: [Burst; 3] = [
    Burst { offset_hz: 200_000.0, amplitude: 0.5, on_secs: 3.0, period_secs: 8.0 },
    Burst { offset_hz: -500_000.0, amplitude: 0.3, on_secs: 1.0, period_secs: 4.0 },
    Burst { offset_hz: 650_000.0, amplitude: 0.2, on_secs: 0.5, period_secs: 11.0 },
];

/// Demo receiver with scheduled carriers over noise.
#[derive(Debug)]
pub struct DemoReceiver {
    sample_rate: u32,
    gain: GainMode,
    started: Instant,
    sample_index: u64,
    rng: StdRng,
}

impl DemoReceiver {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        log::info!("Running in DEMO MODE - generating synthetic signals");
        Self {
            sample_rate,
            gain: GainMode::Auto,
            started: Instant::now(),
            sample_index: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Carrier offsets from the tuned frequency, in Hz.
    #[must_use]
    pub fn carrier_offsets() -> Vec<f32> {
        BURSTS.iter().map(|b| b.offset_hz).collect()
    }

    fn active_bursts(&self) -> Vec<Burst> {
        let elapsed = self.started.elapsed().as_secs_f32();
        BURSTS
            .iter()
            .copied()
            .filter(|b| elapsed % b.period_secs < b.on_secs)
            .collect()
    }

    /// Linear amplitude scale for the current gain setting.
    fn gain_factor(&self) -> f32 {
        match self.gain {
            GainMode::Auto => 1.0,
            #[allow(clippy::cast_precision_loss, reason = "gain in tenths of dB")]
            GainMode::Manual(tenths) => 10f32.powf((tenths as f32 / 10.0 - REFERENCE_GAIN_DB) / 20.0),
        }
    }
}

impl Receiver for DemoReceiver {
    fn set_frequency(&mut self, hz: u32) -> Result<(), ReceiverError> {
        log::debug!("Demo receiver tuned to {hz} Hz");
        Ok(())
    }

    fn set_gain(&mut self, gain: GainMode) -> Result<(), ReceiverError> {
        self.gain = gain;
        Ok(())
    }

    fn set_freq_correction(&mut self, _ppm: i32) -> Result<(), ReceiverError> {
        Ok(())
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        reason = "phase is computed in f64 and wrapped before narrowing"
    )]
    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>, ReceiverError> {
        let bursts = self.active_bursts();
        let scale = self.gain_factor();
        let rate = f64::from(self.sample_rate);
        let mut samples = Vec::with_capacity(count);

        for _ in 0..count {
            let n = self.sample_index;
            self.sample_index = self.sample_index.wrapping_add(1);

            let mut sample = Complex::new(
                self.rng.gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE),
                self.rng.gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE),
            );
            for burst in &bursts {
                let cycles = f64::from(burst.offset_hz) * (n % u64::from(self.sample_rate)) as f64 / rate;
                sample += Complex::from_polar(burst.amplitude, TAU * cycles.fract() as f32);
            }
            samples.push(sample * scale);
        }

        Ok(samples)
    }

    fn gains(&self) -> Vec<f32> {
        vec![0.0, 9.0, 19.7, 29.7, 40.2, 49.6]
    }
}
