//! Second-order Costas carrier-recovery loop for QPSK at symbol rate.

use num_complex::Complex64;

use super::{branchless_clip, loop_gains};

/// Costas loop operating on differential phasors.
///
/// Because the signal is already differentially decoded, the residual
/// carrier shows up as a constant rotation; the phase accumulator is
/// therefore *clamped* to ±π/2 rather than wrapped.
#[derive(Debug, Clone)]
pub struct CostasLoop {
    phase: f64,
    freq: f64,
    alpha: f64,
    beta: f64,
    freq_limit: f64,
}

impl CostasLoop {
    pub fn new(bandwidth: f64, damping: f64, freq_limit: f64) -> Self {
        let (alpha, beta) = loop_gains(bandwidth, damping);
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta,
            freq_limit,
        }
    }

    /// Rotate one symbol by the current phase estimate and advance the loop.
    pub fn advance(&mut self, symbol: Complex64) -> Complex64 {
        let corrected = symbol * Complex64::from_polar(1.0, -self.phase);

        // QPSK decision-directed detector, clipped to ±1.
        let error = (corrected.re.signum() * corrected.im
            - corrected.im.signum() * corrected.re)
            .clamp(-1.0, 1.0);

        self.freq = branchless_clip(self.freq + self.beta * error, self.freq_limit);
        self.phase += self.freq + self.alpha * error;
        self.phase = self.phase.clamp(
            -std::f64::consts::FRAC_PI_2,
            std::f64::consts::FRAC_PI_2,
        );

        corrected
    }

    pub fn frequency(&self) -> f64 {
        self.freq
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Channel retune: the frequency estimate is a hardware property and
    /// survives; the phase does not.
    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(angle_deg: f64) -> Complex64 {
        Complex64::from_polar(1.0, angle_deg.to_radians())
    }

    #[test]
    fn locked_input_produces_no_drift() {
        let mut loop_ = CostasLoop::new(0.008, std::f64::consts::FRAC_1_SQRT_2, 0.1);
        for _ in 0..100 {
            loop_.advance(diagonal(45.0));
        }
        assert!(loop_.frequency().abs() < 1e-6);
        assert!(loop_.phase().abs() < 1e-6);
    }

    #[test]
    fn pulls_in_a_small_static_rotation() {
        let mut loop_ = CostasLoop::new(0.008, std::f64::consts::FRAC_1_SQRT_2, 0.1);
        let mut out = Complex64::new(0.0, 0.0);
        for _ in 0..3000 {
            out = loop_.advance(diagonal(45.0 + 10.0));
        }
        let err = (out.arg().to_degrees() - 45.0).abs();
        assert!(err < 2.0, "residual rotation {} deg", err);
    }

    #[test]
    fn phase_is_clamped_not_wrapped() {
        let mut loop_ = CostasLoop::new(0.1, std::f64::consts::FRAC_1_SQRT_2, 1.0);
        for _ in 0..10000 {
            // Constant worst-case error drives the accumulator hard.
            loop_.advance(Complex64::new(1.0, 0.0));
        }
        assert!(loop_.phase().abs() <= std::f64::consts::FRAC_PI_2 + 1e-12);
    }

    #[test]
    fn retune_keeps_frequency_drops_phase() {
        let mut loop_ = CostasLoop::new(0.008, std::f64::consts::FRAC_1_SQRT_2, 0.1);
        for _ in 0..500 {
            loop_.advance(diagonal(52.0));
        }
        let f = loop_.frequency();
        loop_.reset_phase();
        assert_eq!(loop_.frequency(), f);
        assert_eq!(loop_.phase(), 0.0);
    }
}
