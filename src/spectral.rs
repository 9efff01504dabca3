// SPDX-License-Identifier: PMPL-1.0-or-later

//! Direct discrete Fourier transform for short signals.
//!
//! O(N²) with a precomputed twiddle table; each output bin is scaled by 1/N.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub magnitudes: Vec<f64>,
    pub phases: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Index and magnitude of the strongest bin in the first half, skipping DC.
    pub fn dominant_bin(&self) -> Option<(usize, f64)> {
        let half = self.len() / 2;
        self.magnitudes
            .iter()
            .copied()
            .enumerate()
            .take(half + 1)
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

pub fn compute_dft(signal: &[f64]) -> Spectrum {
    let n = signal.len();
    if n == 0 {
        return Spectrum::default();
    }

    // e^{-2πik/N} for k in 0..N, as (re, im)
    let theta = -2.0 * PI / n as f64;
    let twiddles: Vec<(f64, f64)> = (0..n)
        .map(|k| {
            let angle = theta * k as f64;
            (angle.cos(), angle.sin())
        })
        .collect();

    let bins: Vec<(f64, f64)> = (0..n)
        .into_par_iter()
        .map(|k| {
            let (mut re, mut im) = (0.0, 0.0);
            for (i, sample) in signal.iter().enumerate() {
                // widened: k*i overflows usize for large N on 32-bit
                let (tr, ti) = twiddles[((k as u128 * i as u128) % n as u128) as usize];
                re += sample * tr;
                im += sample * ti;
            }
            let (re, im) = (re / n as f64, im / n as f64);
            (re.hypot(im), im.atan2(re))
        })
        .collect();

    let (magnitudes, phases) = bins.into_iter().unzip();
    Spectrum { magnitudes, phases }
}

/// Read whitespace- or comma-separated samples from a text file.
pub fn load_signal(path: &Path) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    content
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f64>().map_err(|_| {
                TriageError::validation(format!(
                    "sample {} in {} is not a number: {token:?}",
                    index + 1,
                    path.display()
                ))
            })
        })
        .collect()
}
