//! Block product turbo codes: the full-burst BPTC(196,96) and the
//! embedded-signalling BPTC(128,77).
//!
//! The 196-bit payload deinterleaves by the 181-step permutation into a
//! 13×15 product matrix: Hamming(15,11,3) across rows, Hamming(13,9,3)
//! down columns, with one pad bit ahead of the matrix. Row and column
//! passes are iterated until they stop correcting; residual syndromes mark
//! the burst irrecoverable.

use super::hamming::{hamming_13_9, hamming_15_11, hamming_16_11, HammingStatus};

/// Result of a BPTC pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BptcResult {
    /// Recovered information bits (96 for the full code, 77 embedded).
    pub info: Vec<u8>,
    /// Reserved bits R[0..2] preceding the info field (full code only).
    pub reserved: [u8; 3],
    /// Bits corrected across all row/column passes.
    pub corrected: usize,
    /// True when syndromes remained after the iteration limit.
    pub irrecoverable: bool,
}

const ROWS: usize = 13;
const COLS: usize = 15;
const PASSES: usize = 5;

/// Deinterleave the on-air 196 bits into matrix order.
pub fn deinterleave_196(raw: &[u8]) -> [u8; 196] {
    debug_assert_eq!(raw.len(), 196);
    let mut out = [0u8; 196];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = raw[(i * 181) % 196];
    }
    out
}

/// Inverse permutation, used by the encoder and by tests.
pub fn interleave_196(matrix_order: &[u8; 196]) -> [u8; 196] {
    let mut out = [0u8; 196];
    for i in 0..196 {
        out[(i * 181) % 196] = matrix_order[i];
    }
    out
}

/// Decode one 196-bit burst payload (on-air bit order).
pub fn bptc_196_96(raw: &[u8]) -> BptcResult {
    let deint = deinterleave_196(raw);

    // Bit 0 is pad; the matrix is row-major after it.
    let mut m = [[0u8; COLS]; ROWS];
    for r in 0..ROWS {
        for c in 0..COLS {
            m[r][c] = deint[r * COLS + c + 1];
        }
    }

    let mut corrected = 0usize;
    let mut clean = false;
    for _ in 0..PASSES {
        let mut changed = false;
        for row in m.iter_mut() {
            match hamming_15_11(row) {
                HammingStatus::Corrected(_) => {
                    corrected += 1;
                    changed = true;
                }
                HammingStatus::Uncorrectable => changed = true,
                HammingStatus::Clean => {}
            }
        }
        let mut col_dirty = false;
        for c in 0..COLS {
            let mut col = [0u8; ROWS];
            for r in 0..ROWS {
                col[r] = m[r][c];
            }
            match hamming_13_9(&mut col) {
                HammingStatus::Corrected(_) => {
                    corrected += 1;
                    changed = true;
                    for r in 0..ROWS {
                        m[r][c] = col[r];
                    }
                }
                HammingStatus::Uncorrectable => col_dirty = true,
                HammingStatus::Clean => {}
            }
        }
        if !col_dirty && rows_clean(&m) {
            clean = true;
            break;
        }
        if !changed {
            break;
        }
    }

    // First three data positions are the reserved bits, then 96 info bits.
    let mut reserved = [0u8; 3];
    let mut info = Vec::with_capacity(96);
    for r in 0..9 {
        for c in 0..11 {
            let seq = r * 11 + c;
            if seq < 3 {
                reserved[seq] = m[r][c];
            } else {
                info.push(m[r][c]);
            }
        }
    }

    BptcResult {
        info,
        reserved,
        corrected,
        irrecoverable: !clean,
    }
}

fn rows_clean(m: &[[u8; COLS]; ROWS]) -> bool {
    m.iter().all(|row| {
        let mut probe = *row;
        hamming_15_11(&mut probe) == HammingStatus::Clean
    })
}

/// Encode 96 info bits (plus reserved bits) into the on-air 196-bit order.
/// Used by the loopback tests and by nothing on the receive path.
pub fn encode_196_96(info: &[u8], reserved: [u8; 3]) -> [u8; 196] {
    debug_assert_eq!(info.len(), 96);
    let mut m = [[0u8; COLS]; ROWS];
    let mut it = info.iter();
    for r in 0..9 {
        for c in 0..11 {
            let seq = r * 11 + c;
            m[r][c] = if seq < 3 {
                reserved[seq]
            } else {
                *it.next().unwrap()
            };
        }
    }
    // Row parity over the 9 data rows, then column parity over all 13 rows.
    for r in 0..9 {
        let mut data = [0u8; 11];
        data.copy_from_slice(&m[r][..11]);
        let cw = super::hamming::encode_15_11(&data);
        m[r].copy_from_slice(&cw);
    }
    for c in 0..COLS {
        let mut data = [0u8; 9];
        for r in 0..9 {
            data[r] = m[r][c];
        }
        let cw = super::hamming::encode_13_9(&data);
        for r in 0..ROWS {
            m[r][c] = cw[r];
        }
    }

    let mut matrix_order = [0u8; 196];
    for r in 0..ROWS {
        for c in 0..COLS {
            matrix_order[r * COLS + c + 1] = m[r][c];
        }
    }
    interleave_196(&matrix_order)
}

/// Embedded-signalling product code: seven Hamming(16,11,4) rows carrying
/// 77 info bits and a trailing even-parity row.
pub fn bptc_128_77(raw: &[u8]) -> BptcResult {
    debug_assert_eq!(raw.len(), 128);

    let mut m = [[0u8; 16]; 8];
    for r in 0..8 {
        for c in 0..16 {
            m[r][c] = raw[r * 16 + c];
        }
    }

    let mut corrected = 0usize;
    let mut irrecoverable = false;
    for row in m.iter_mut().take(7) {
        match hamming_16_11(row) {
            HammingStatus::Corrected(_) => corrected += 1,
            HammingStatus::Uncorrectable => irrecoverable = true,
            HammingStatus::Clean => {}
        }
    }
    // The last row holds column parity over the seven data rows.
    for c in 0..16 {
        let parity = (0..7).fold(0u8, |acc, r| acc ^ m[r][c]);
        if parity != m[7][c] {
            irrecoverable = true;
        }
    }

    let mut info = Vec::with_capacity(77);
    for r in 0..7 {
        info.extend_from_slice(&m[r][..11]);
    }

    BptcResult {
        info,
        reserved: [0; 3],
        corrected,
        irrecoverable,
    }
}

/// Encoder counterpart of [`bptc_128_77`].
pub fn encode_128_77(info: &[u8]) -> [u8; 128] {
    debug_assert_eq!(info.len(), 77);
    let mut m = [[0u8; 16]; 8];
    for r in 0..7 {
        let mut data = [0u8; 11];
        data.copy_from_slice(&info[r * 11..(r + 1) * 11]);
        m[r] = super::hamming::encode_16_11(&data);
    }
    for c in 0..16 {
        m[7][c] = (0..7).fold(0u8, |acc, r| acc ^ m[r][c]);
    }
    let mut out = [0u8; 128];
    for r in 0..8 {
        out[r * 16..(r + 1) * 16].copy_from_slice(&m[r]);
    }
    out
}
