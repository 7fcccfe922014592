//! Error types for the decoder core with granular categories.

use thiserror::Error;

/// Top-level error type for all decoder-core operations.
#[derive(Debug, Error)]
pub enum DvrxError {
    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Tuner error: {0}")]
    Tune(#[from] TuneError),
}

/// Errors produced by the pure FEC kernels.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FecError {
    #[error("{kind} irrecoverable after correction: {residual_errors} residual errors")]
    Irrecoverable {
        kind: FecKind,
        residual_errors: usize,
    },

    #[error("input length {actual} does not match {kind} block of {expected}")]
    BlockLength {
        kind: FecKind,
        expected: usize,
        actual: usize,
    },
}

/// Which FEC kernel reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FecKind {
    Bptc196,
    Bptc128,
    Hamming1511,
    Hamming139,
    Hamming1611,
    Hamming106,
    Golay2412,
    Golay246,
    Golay208,
    Rs129,
    TrellisHalf,
    TrellisThreeQuarter,
}

impl std::fmt::Display for FecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FecKind::Bptc196 => "BPTC(196,96)",
            FecKind::Bptc128 => "BPTC(128,77)",
            FecKind::Hamming1511 => "Hamming(15,11)",
            FecKind::Hamming139 => "Hamming(13,9)",
            FecKind::Hamming1611 => "Hamming(16,11)",
            FecKind::Hamming106 => "Hamming(10,6)",
            FecKind::Golay2412 => "Golay(24,12)",
            FecKind::Golay246 => "Golay(24,6)",
            FecKind::Golay208 => "Golay(20,8)",
            FecKind::Rs129 => "RS(12,9)",
            FecKind::TrellisHalf => "1/2-rate trellis",
            FecKind::TrellisThreeQuarter => "3/4-rate trellis",
        };
        write!(f, "{}", name)
    }
}

/// Frame-level failures: a single burst is dropped, the slot keeps its state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{kind} CRC mismatch: extracted {extracted:#x}, computed {computed:#x}")]
    CrcMismatch {
        kind: CrcKind,
        extracted: u32,
        computed: u32,
    },

    #[error("out-of-sequence data block: expected DBSN {expected_dbsn}, got {got_dbsn}")]
    OutOfSequence { expected_dbsn: u8, got_dbsn: u8 },

    #[error("superframe bounds exceeded: block {block}, capacity {capacity}")]
    SuperframeOverflow { block: usize, capacity: usize },

    #[error("sync not found after {dibits_searched} dibits")]
    SyncNotFound { dibits_searched: usize },
}

/// Which CRC variant failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CrcKind {
    Crc5,
    Crc8,
    Crc9,
    Crc12,
    Crc16,
    Crc32,
    RsParity,
}

impl std::fmt::Display for CrcKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CrcKind::Crc5 => "CRC-5",
            CrcKind::Crc8 => "CRC-8",
            CrcKind::Crc9 => "CRC-9",
            CrcKind::Crc12 => "CRC-12",
            CrcKind::Crc16 => "CRC-16",
            CrcKind::Crc32 => "CRC-32",
            CrcKind::RsParity => "RS parity",
        };
        write!(f, "{}", name)
    }
}

/// PDU-level failures: the PDU is abandoned, tables stay consistent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("encrypted call locked out: tg {tg}, alg {alg:#04x}, keyid {keyid:#06x}")]
    EncryptionLocked { tg: u32, alg: u8, keyid: u16 },

    #[error("unknown MAC opcode {opcode:#04x} (mfid {mfid:#04x})")]
    UnknownOpcode { mfid: u8, opcode: u8 },

    #[error("channel {channel:#06x} has no trusted identifier mapping")]
    ChannelUnmappable { channel: u16 },

    #[error("PDU truncated: need {needed} octets, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Tuner failures: recovered by the state machine via candidate hunting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TuneError {
    #[error("device tune to {freq} Hz failed")]
    DeviceTuneFailed { freq: u64 },

    #[error("control-channel candidate list exhausted")]
    CandidatesExhausted,
}

/// Result type alias for decoder-core operations.
pub type Result<T> = std::result::Result<T, DvrxError>;
