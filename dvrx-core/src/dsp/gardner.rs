//! Gardner timing-error detector with polyphase interpolation.
//!
//! Pure timing: no NCO rotation happens here. Incoming samples land in a
//! circular delay line written twice (at `i` and `i + twice_sps`) so every
//! interpolation window is contiguous. When the fractional index μ crosses
//! one, the loop interpolates the symbol point and its mid-point, steers
//! (μ, ω), and emits one symbol.

use num_complex::Complex64;

use super::interp::{MmseInterpolator, NTAPS};

#[derive(Debug, Clone)]
pub struct GardnerTed {
    mu: f64,
    omega: f64,
    omega_mid: f64,
    omega_rel: f64,
    gain_mu: f64,
    gain_omega: f64,
    twice_sps: usize,
    delay_line: Vec<Complex64>,
    dl_idx: usize,
    last_symbol: Complex64,
    interp: MmseInterpolator,
}

impl GardnerTed {
    pub fn new(sps: f64, gain_mu: f64, omega_rel: f64) -> Self {
        let mut ted = Self {
            mu: 0.0,
            omega: 0.0,
            omega_mid: 0.0,
            omega_rel,
            gain_mu,
            gain_omega: 0.1 * gain_mu * gain_mu,
            twice_sps: 0,
            delay_line: Vec::new(),
            dl_idx: 0,
            last_symbol: Complex64::new(0.0, 0.0),
            interp: MmseInterpolator::new(),
        };
        ted.reset(sps);
        ted
    }

    /// Rate change (and initial setup): clears the delay line and restarts
    /// μ at `sps` so the consumption loop pre-fills the line before the
    /// first symbol is emitted.
    pub fn reset(&mut self, sps: f64) {
        self.omega = sps;
        self.omega_mid = sps;
        self.mu = sps;
        let max_omega = sps * (1.0 + self.omega_rel);
        self.twice_sps = 2 * max_omega.ceil() as usize;
        self.delay_line = vec![Complex64::new(0.0, 0.0); 2 * self.twice_sps];
        self.dl_idx = 0;
        self.last_symbol = Complex64::new(0.0, 0.0);
    }

    /// Feed one sample; emits at most one symbol.
    pub fn input(&mut self, sample: Complex64) -> Option<Complex64> {
        self.delay_line[self.dl_idx] = sample;
        self.delay_line[self.dl_idx + self.twice_sps] = sample;
        self.dl_idx = (self.dl_idx + 1) % self.twice_sps;
        self.mu -= 1.0;
        if self.mu > 1.0 {
            return None;
        }

        let half_omega = self.omega / 2.0;
        let mut half_sps = half_omega.floor() as usize;
        let mut half_mu = self.mu + half_omega - half_sps as f64;
        if half_mu > 1.0 {
            half_mu -= 1.0;
            half_sps += 1;
        }

        // Guard the interpolation windows against the delay-line wrap:
        // drop this symbol and let the clock run on.
        if self.dl_idx + half_sps + NTAPS > 2 * self.twice_sps {
            self.mu += self.omega;
            return None;
        }

        let mu = self.mu.clamp(0.0, 1.0);
        let symbol = self
            .interp
            .interpolate(&self.delay_line[self.dl_idx..], mu);
        let mid = self
            .interp
            .interpolate(&self.delay_line[self.dl_idx + half_sps..], half_mu.clamp(0.0, 1.0));

        let error = ((self.last_symbol - symbol) * mid).re.clamp(-1.0, 1.0);

        let limit = self.omega_mid * self.omega_rel;
        self.omega = (self.omega + self.gain_omega * error * symbol.norm())
            .clamp(self.omega_mid - limit, self.omega_mid + limit);
        self.mu += self.omega + self.gain_mu * error;

        self.last_symbol = symbol;
        Some(symbol)
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(ted: &mut GardnerTed, n: usize, sps: f64) -> usize {
        let mut emitted = 0;
        for i in 0..n {
            // Alternating-symbol waveform: full swing every sps samples.
            let phase = std::f64::consts::PI * (i as f64 / sps);
            let s = Complex64::new(phase.cos(), phase.sin() * 0.2);
            if ted.input(s).is_some() {
                emitted += 1;
            }
        }
        emitted
    }

    #[test]
    fn emits_at_most_one_symbol_per_sps_samples() {
        let mut ted = GardnerTed::new(5.0, 0.025, 0.002);
        let n = 1000;
        let emitted = drive(&mut ted, n, 5.0);
        assert!(emitted <= n / 5 + 1, "emitted {}", emitted);
        assert!(emitted >= n / 5 - 3, "emitted only {}", emitted);
    }

    #[test]
    fn mu_stays_bounded_after_processing() {
        let mut ted = GardnerTed::new(4.0, 0.025, 0.002);
        drive(&mut ted, 4096, 4.0);
        let bound = 1.0 + ted.omega() + 1.0;
        assert!(ted.mu() > -1.0 && ted.mu() < bound + 4.0, "mu = {}", ted.mu());
    }

    #[test]
    fn omega_clamps_to_the_relative_window() {
        let mut ted = GardnerTed::new(5.0, 0.025, 0.002);
        drive(&mut ted, 8192, 4.9); // slightly wrong clock
        let limit = 5.0 * 0.002;
        assert!((ted.omega() - 5.0).abs() <= limit + 1e-9);
    }

    #[test]
    fn reset_restores_prefill_behaviour() {
        let mut ted = GardnerTed::new(5.0, 0.025, 0.002);
        drive(&mut ted, 64, 5.0);
        ted.reset(4.0);
        assert_eq!(ted.mu(), 4.0);
        assert_eq!(ted.omega(), 4.0);
        // μ has to drain below one before anything is emitted again.
        assert!(ted.input(Complex64::new(1.0, 0.0)).is_none());
        assert!(ted.input(Complex64::new(-1.0, 0.0)).is_none());
    }
}
