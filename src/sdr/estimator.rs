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

//! Power spectral density estimation.
//!
//! Averaged periodogram over consecutive Hann-windowed segments, two-sided and
//! centred on the tuned frequency (lowest frequency first), scaled to power
//! per Hz.

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Floor for levels of empty bins, in dB.
pub const LEVEL_MIN: f32 = -150.0;

/// Spectral estimator for a fixed number of bins and sample rate.
pub struct Estimator {
    bins: usize,
    sample_rate: f64,
    window: Vec<f32>,
    window_power: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("bins", &self.bins)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl Estimator {
    #[must_use]
    pub fn new(bins: usize, sample_rate: f64) -> Self {
        let bins = bins.max(2);
        #[allow(clippy::cast_precision_loss, reason = "window length is small")]
        let window: Vec<f32> = (0..bins)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (bins - 1) as f32).cos())
            .collect();
        let window_power = window.iter().map(|w| w * w).sum();
        let fft = FftPlanner::new().plan_fft_forward(bins);

        Self {
            bins,
            sample_rate,
            window,
            window_power,
            fft,
        }
    }

    #[must_use]
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Bin centre frequencies in MHz around `center_mhz`, ascending.
    #[must_use]
    pub fn frequencies(&self, center_mhz: f64) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss, reason = "bin counts are far below 2^52")]
        let step = self.sample_rate / self.bins as f64 / 1e6;
        let half = self.bins / 2;
        (0..self.bins)
            .map(|j| {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, reason = "small bin index")]
                let offset = j as i64 - half as i64;
                #[allow(clippy::cast_precision_loss, reason = "small bin index")]
                let offset = offset as f64;
                center_mhz + offset * step
            })
            .collect()
    }

    /// Linear power per bin, lowest frequency first.
    ///
    /// Fewer samples than one segment are zero padded.
    #[must_use]
    pub fn estimate(&self, samples: &[Complex<f32>]) -> Vec<f32> {
        let segments = (samples.len() / self.bins).max(1);
        let mut accumulated = vec![0.0f32; self.bins];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.bins];

        for segment in 0..segments {
            let start = segment * self.bins;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = samples.get(start + i).map_or(Complex::new(0.0, 0.0), |s| *s * self.window[i]);
            }
            self.fft.process(&mut buffer);
            for (acc, value) in accumulated.iter_mut().zip(&buffer) {
                *acc += value.norm_sqr();
            }
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, reason = "scale factor")]
        let scale = 1.0 / (segments as f32 * self.sample_rate as f32 * self.window_power);
        let half = self.bins / 2;
        (0..self.bins)
            .map(|j| accumulated[(j + self.bins - half) % self.bins] * scale)
            .collect()
    }
}

/// Convert linear power to dB, flooring at [`LEVEL_MIN`].
#[must_use]
pub fn to_db(power: f32) -> f32 {
    if power > 0.0 {
        (10.0 * power.log10()).max(LEVEL_MIN)
    } else {
        LEVEL_MIN
    }
}
