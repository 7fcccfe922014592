//! Band-edge frequency-lock loop.
//!
//! The loop mixes the input with its NCO, runs the rotated stream through
//! a pair of band-edge filters sitting at ±(1+rolloff)/(2·sps), and steers
//! frequency from the power difference of the two sidebands. Filter
//! kernels are designed at construction (and on every rate change) from
//! the matched-filter derivative pair rather than loaded from tables.

use num_complex::Complex64;

use super::{branchless_clip, loop_gains};

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

#[derive(Debug, Clone)]
pub struct BandEdgeFll {
    taps_lower: Vec<Complex64>,
    taps_upper: Vec<Complex64>,
    history: Vec<Complex64>,
    hist_idx: usize,
    phase: f64,
    freq: f64,
    alpha: f64,
    beta: f64,
    max_freq: f64,
}

impl BandEdgeFll {
    pub fn new(sps: f64, rolloff: f64, bandwidth: f64) -> Self {
        let (alpha, beta) = loop_gains(bandwidth, std::f64::consts::FRAC_1_SQRT_2);
        let mut fll = Self {
            taps_lower: Vec::new(),
            taps_upper: Vec::new(),
            history: Vec::new(),
            hist_idx: 0,
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta,
            max_freq: std::f64::consts::TAU * 2.0 / sps,
        };
        fll.design_filter(sps, rolloff);
        fll
    }

    /// Build the lower/upper band-edge kernels for the given rate.
    fn design_filter(&mut self, sps: f64, rolloff: f64) {
        let filter_size = (4.0 * sps).ceil() as usize | 1;
        let m = (filter_size as f64 / sps).round();

        let mut bb_taps = Vec::with_capacity(filter_size);
        let mut power = 0.0;
        for i in 0..filter_size {
            let k = -m + i as f64 * 2.0 / sps;
            let tap = sinc(rolloff * k - 0.5) + sinc(rolloff * k + 0.5);
            power += tap;
            bb_taps.push(tap);
        }

        let n = (filter_size - 1) as f64 / 2.0;
        self.taps_lower = vec![Complex64::new(0.0, 0.0); filter_size];
        self.taps_upper = vec![Complex64::new(0.0, 0.0); filter_size];
        for i in 0..filter_size {
            let tap = bb_taps[i] / power;
            let k = (-n + i as f64) / (2.0 * sps);
            let spin = std::f64::consts::TAU * (1.0 + rolloff) * k;
            self.taps_lower[filter_size - i - 1] = tap * Complex64::from_polar(1.0, -spin);
            self.taps_upper[filter_size - i - 1] = tap * Complex64::from_polar(1.0, spin);
        }

        self.history = vec![Complex64::new(0.0, 0.0); filter_size];
        self.hist_idx = 0;
        self.max_freq = std::f64::consts::TAU * 2.0 / sps;
    }

    /// Rate change: kernels are rebuilt and the filter history cleared,
    /// but the frequency estimate tracks the hardware and is preserved.
    pub fn retune(&mut self, sps: f64, rolloff: f64) {
        self.design_filter(sps, rolloff);
        self.phase = 0.0;
    }

    /// Advance the NCO, rotate one sample, and steer the loop from the
    /// band-edge power difference. Returns the rotated sample.
    pub fn process(&mut self, sample: Complex64) -> Complex64 {
        let rotated = sample * Complex64::from_polar(1.0, self.phase);

        let len = self.history.len();
        self.history[self.hist_idx] = rotated;
        self.hist_idx = (self.hist_idx + 1) % len;

        let mut upper = Complex64::new(0.0, 0.0);
        let mut lower = Complex64::new(0.0, 0.0);
        for i in 0..len {
            let s = self.history[(self.hist_idx + i) % len];
            upper += s * self.taps_upper[i];
            lower += s * self.taps_lower[i];
        }

        let error = upper.norm_sqr() - lower.norm_sqr();

        self.freq = branchless_clip(self.freq + self.beta * error, self.max_freq);
        self.phase += self.freq + self.alpha * error;
        while self.phase > std::f64::consts::PI {
            self.phase -= std::f64::consts::TAU;
        }
        while self.phase < -std::f64::consts::PI {
            self.phase += std::f64::consts::TAU;
        }

        rotated
    }

    /// Frequency estimate in radians per sample.
    pub fn frequency(&self) -> f64 {
        self.freq
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.freq = branchless_clip(freq, self.max_freq);
    }
}
