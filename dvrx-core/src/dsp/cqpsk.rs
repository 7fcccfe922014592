//! The CQPSK symbol-recovery front-end.
//!
//! Per-sample ordering is the contract: AGC, band-edge FLL, Gardner
//! timing, then per emitted symbol the one-symbol differential phasor and
//! the Costas loop. The front-end never fails; when the delay line is not
//! full enough it simply produces fewer symbols.

use num_complex::Complex64;

use super::agc::Agc;
use super::costas::CostasLoop;
use super::fll::BandEdgeFll;
use super::gardner::GardnerTed;
use crate::config::DemodConfig;

pub struct CqpskFrontEnd {
    config: DemodConfig,
    agc: Agc,
    fll: BandEdgeFll,
    gardner: GardnerTed,
    costas: CostasLoop,
    diff_prev: Complex64,
}

impl CqpskFrontEnd {
    pub fn new(config: DemodConfig) -> Self {
        let fll = BandEdgeFll::new(config.sps, config.rolloff, config.fll_bandwidth());
        let gardner = GardnerTed::new(config.sps, config.gardner_gain_mu, config.gardner_omega_rel);
        let costas = CostasLoop::new(
            config.costas_bandwidth,
            config.costas_damping,
            config.costas_freq_limit,
        );
        Self {
            config,
            agc: Agc::default(),
            fll,
            gardner,
            costas,
            diff_prev: Complex64::new(1.0, 0.0),
        }
    }

    /// Process one block of IQ samples, appending symbol-rate differential
    /// phasors to `out`. Emits at most ⌈N/sps⌉ symbols for N input samples.
    pub fn process(&mut self, input: &[Complex64], out: &mut Vec<Complex64>) {
        for &raw in input {
            let leveled = self.agc.process(raw);
            let rotated = self.fll.process(leveled);
            if let Some(symbol) = self.gardner.input(rotated) {
                let diff = symbol * self.diff_prev.conj();
                self.diff_prev = symbol;
                out.push(self.costas.advance(diff));
            }
        }
    }

    /// Samples-per-symbol change (control channel ↔ voice channel).
    ///
    /// Filters are redesigned and the delay line cleared; μ and ω restart
    /// at the new rate. The FLL and Costas frequency estimates describe
    /// the local oscillator, not the channel, and are preserved; both
    /// phases reset. The differential decoder restarts at unity so the
    /// first post-retune symbol passes through.
    pub fn retune(&mut self, sps: f64) {
        self.config.sps = sps;
        self.fll.retune(sps, self.config.rolloff);
        self.gardner.reset(sps);
        self.costas.reset_phase();
        self.diff_prev = Complex64::new(1.0, 0.0);
    }

    /// FLL frequency estimate in radians per sample.
    pub fn fll_frequency(&self) -> f64 {
        self.fll.frequency()
    }

    /// FLL frequency estimate in hertz for the given sample rate.
    pub fn fll_frequency_hz(&self, sample_rate: f64) -> f64 {
        self.fll.frequency() * sample_rate / std::f64::consts::TAU
    }

    pub fn costas_frequency(&self) -> f64 {
        self.costas.frequency()
    }

    pub fn sps(&self) -> f64 {
        self.config.sps
    }
}
