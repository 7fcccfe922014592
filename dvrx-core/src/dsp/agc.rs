//! Feedback automatic gain control.

use num_complex::Complex64;

/// Per-sample feedback AGC driving the output magnitude toward a
/// reference level. The loop never fails; wildly off-scale input just
/// takes more samples to settle.
#[derive(Debug, Clone)]
pub struct Agc {
    gain: f64,
    rate: f64,
    reference: f64,
    max_gain: f64,
}

impl Agc {
    pub fn new(rate: f64, reference: f64, max_gain: f64) -> Self {
        Self {
            gain: 1.0,
            rate,
            reference,
            max_gain,
        }
    }

    pub fn process(&mut self, sample: Complex64) -> Complex64 {
        let out = sample * self.gain;
        self.gain += self.rate * (self.reference - out.norm());
        if self.gain > self.max_gain {
            self.gain = self.max_gain;
        } else if self.gain < 0.0 {
            self.gain = 0.0;
        }
        out
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Default for Agc {
    fn default() -> Self {
        Self::new(0.01, 1.0, 1.0e6)
    }
}
