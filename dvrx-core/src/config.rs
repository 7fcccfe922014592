//! Configuration types for the decoder pipeline and trunking policy.
use serde::{Deserialize, Serialize};

/// Default soft-decision erasure threshold. A dibit whose reliability falls
/// strictly below this value is treated as an erasure by the soft decoders.
pub const DEFAULT_SOFT_ERASURE: u8 = 64;

/// Read the erasure threshold, honouring the `DVRX_SOFT_ERASURE` override.
/// This is the only tunable the core takes from the environment; everything
/// else travels through the function surface.
pub fn soft_erasure_threshold() -> u8 {
    std::env::var("DVRX_SOFT_ERASURE")
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(DEFAULT_SOFT_ERASURE)
}

/// Loop parameters for the CQPSK symbol-recovery front-end.
///
/// The defaults are samples-per-symbol dependent and reproduce the
/// production tuning: FLL bandwidth 2π/(sps·350), Costas bandwidth 0.008
/// at damping √2/2, Gardner gain 0.025 with ω relative limit 0.002.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemodConfig {
    /// Samples per symbol at the current channel rate.
    pub sps: f64,
    /// Excess-bandwidth (roll-off) factor of the band-edge filters.
    pub rolloff: f64,
    /// Costas loop bandwidth (radians/symbol).
    pub costas_bandwidth: f64,
    /// Costas loop damping factor.
    pub costas_damping: f64,
    /// Costas frequency limit (radians/symbol).
    pub costas_freq_limit: f64,
    /// Gardner proportional gain g_mu.
    pub gardner_gain_mu: f64,
    /// Relative clock-rate limit for the Gardner omega clamp.
    pub gardner_omega_rel: f64,
}

impl DemodConfig {
    pub fn for_sps(sps: f64) -> Self {
        Self {
            sps,
            rolloff: 0.2,
            costas_bandwidth: 0.008,
            costas_damping: std::f64::consts::FRAC_1_SQRT_2,
            costas_freq_limit: 0.1,
            gardner_gain_mu: 0.025,
            gardner_omega_rel: 0.002,
        }
    }

    /// FLL loop bandwidth for the configured rate.
    pub fn fll_bandwidth(&self) -> f64 {
        std::f64::consts::TAU / (self.sps * 350.0)
    }

    /// Derived Gardner integral gain g_omega = 0.1·g_mu².
    pub fn gardner_gain_omega(&self) -> f64 {
        0.1 * self.gardner_gain_mu * self.gardner_gain_mu
    }
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self::for_sps(5.0)
    }
}

/// Which span the Phase 2 LCCH CRC-16 covers. Two historical readings
/// exist in the field; both are implemented and selected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LcchCrcSpan {
    /// Fixed 164-bit span over the whole LCCH payload.
    #[default]
    Fixed164,
    /// 16 + 8·MCO bits, derived from the MAC length octet.
    McoDerived,
}

/// Trunk-following policy and data-assembly strictness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrunkConfig {
    /// Follow group voice grants.
    pub tune_group_calls: bool,
    /// Follow unit-to-unit and telephone-interconnect grants.
    pub tune_private_calls: bool,
    /// Follow data channel grants.
    pub tune_data_calls: bool,
    /// Follow encrypted calls. When false, an encrypted grant marks the
    /// talkgroup locked-out exactly once and never tunes.
    pub tune_enc_calls: bool,
    /// Hold on this talkgroup exclusively (0 = no hold).
    pub tg_hold: u32,
    /// Voice-channel hang time before returning to the control channel.
    pub hang_time: std::time::Duration,
    /// Strict confirmed-data sequencing: an out-of-order DBSN resets the
    /// slot. Relaxed mode logs and keeps collecting.
    pub strict_data_sequence: bool,
    /// Tolerate bad header CRCs on DMR data headers (relaxed capture mode).
    pub dmr_crc_relaxed: bool,
    /// CRC-16 span used for Phase 2 LCCH frames.
    pub lcch_crc_span: LcchCrcSpan,
}

impl Default for TrunkConfig {
    fn default() -> Self {
        Self {
            tune_group_calls: true,
            tune_private_calls: true,
            tune_data_calls: false,
            tune_enc_calls: false,
            tg_hold: 0,
            hang_time: std::time::Duration::from_millis(1000),
            strict_data_sequence: true,
            dmr_crc_relaxed: false,
            lcch_crc_span: LcchCrcSpan::Fixed164,
        }
    }
}
