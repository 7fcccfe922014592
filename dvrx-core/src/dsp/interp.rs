//! Polyphase fractional-delay interpolator for the timing loop.
//!
//! Eight taps per row, seventeen rows covering μ ∈ [0,1] in 1/16 steps,
//! with linear interpolation between adjacent rows. Rows are designed at
//! construction as a Blackman-windowed sinc bank approximating the MMSE
//! fractional-delay response, normalized to unit DC gain.

use num_complex::Complex64;

pub const NTAPS: usize = 8;
pub const NSTEPS: usize = 16;

#[derive(Debug, Clone)]
pub struct MmseInterpolator {
    taps: [[f64; NTAPS]; NSTEPS + 1],
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

impl MmseInterpolator {
    pub fn new() -> Self {
        let mut taps = [[0.0; NTAPS]; NSTEPS + 1];
        for (row, bank) in taps.iter_mut().enumerate() {
            // Row `row` reconstructs the point NTAPS/2 - 1 + row/NSTEPS
            // samples into the window.
            let delay = (NTAPS / 2 - 1) as f64 + row as f64 / NSTEPS as f64;
            let mut sum = 0.0;
            for (j, tap) in bank.iter_mut().enumerate() {
                let x = j as f64 - delay;
                // Blackman window centred on the reconstruction point.
                let w = if x.abs() < (NTAPS / 2) as f64 {
                    let u = std::f64::consts::PI * (x / NTAPS as f64 + 0.5);
                    0.42 - 0.5 * (2.0 * u).cos() + 0.08 * (4.0 * u).cos()
                } else {
                    0.0
                };
                *tap = sinc(x) * w;
                sum += *tap;
            }
            for tap in bank.iter_mut() {
                *tap /= sum;
            }
        }
        Self { taps }
    }

    /// Interpolate at fractional position `mu` ∈ [0,1] into an 8-sample
    /// window, blending linearly between the two nearest tap rows.
    pub fn interpolate(&self, window: &[Complex64], mu: f64) -> Complex64 {
        debug_assert!(window.len() >= NTAPS);
        let pos = mu.clamp(0.0, 1.0) * NSTEPS as f64;
        let row = (pos as usize).min(NSTEPS - 1);
        let frac = pos - row as f64;

        let mut lo = Complex64::new(0.0, 0.0);
        let mut hi = Complex64::new(0.0, 0.0);
        for j in 0..NTAPS {
            lo += window[j] * self.taps[row][j];
            hi += window[j] * self.taps[row + 1][j];
        }
        lo * (1.0 - frac) + hi * frac
    }
}

impl Default for MmseInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mu_zero_recovers_the_pivot_sample() {
        let interp = MmseInterpolator::new();
        let window: Vec<Complex64> = (0..NTAPS)
            .map(|i| Complex64::new(i as f64, -(i as f64)))
            .collect();
        let out = interp.interpolate(&window, 0.0);
        assert_relative_eq!(out.re, 3.0, epsilon = 0.05);
        assert_relative_eq!(out.im, -3.0, epsilon = 0.05);
    }

    #[test]
    fn mu_one_recovers_the_next_sample() {
        let interp = MmseInterpolator::new();
        let window: Vec<Complex64> = (0..NTAPS)
            .map(|i| Complex64::new(i as f64, 0.0))
            .collect();
        let out = interp.interpolate(&window, 1.0);
        assert_relative_eq!(out.re, 4.0, epsilon = 0.05);
    }

    #[test]
    fn interpolates_a_slow_sinusoid_smoothly() {
        let interp = MmseInterpolator::new();
        let window: Vec<Complex64> = (0..NTAPS)
            .map(|i| Complex64::new((0.25 * i as f64).sin(), 0.0))
            .collect();
        let expected: f64 = (0.25_f64 * 3.5).sin();
        let out = interp.interpolate(&window, 0.5);
        assert_relative_eq!(out.re, expected, epsilon = 0.02);
    }
}
