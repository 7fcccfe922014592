//! Extended Golay kernels and their Chase-style soft decoders.
//!
//! The (24,12,8) code is built systematically from the (23,12) generator
//! polynomial x¹¹+x⁹+x⁷+x⁶+x⁵+x+1 plus an overall parity bit. The (24,6)
//! and (20,8) variants are shortenings of it: the unused message bits are
//! pinned to zero, which keeps the minimum distance at eight and lets all
//! three share one table family. Hard decoding is nearest-codeword over
//! the (lazily built) codeword tables, exact for up to three bit errors.

use once_cell::sync::Lazy;

const GOLAY_POLY: u32 = 0xAE3;

/// Systematic (23,12) remainder: data(x)·x¹¹ mod g(x).
fn golay_parity(data: u16) -> u16 {
    let mut rem = 0u32;
    for i in (0..12).rev() {
        let fb = ((rem >> 10) & 1) ^ u32::from((data >> i) & 1);
        rem = (rem << 1) & 0x7FF;
        if fb == 1 {
            rem ^= GOLAY_POLY & 0x7FF;
        }
    }
    rem as u16
}

/// Encode 12 data bits into the 24-bit extended codeword,
/// data-first MSB-first, overall parity in the last bit.
pub fn encode_24_12(data: u16) -> u32 {
    debug_assert!(data < (1 << 12));
    let cw23 = (u32::from(data) << 11) | u32::from(golay_parity(data));
    (cw23 << 1) | (cw23.count_ones() & 1)
}

/// Encode 6 data bits as the shortened (24,6) codeword.
pub fn encode_24_6(data: u8) -> u32 {
    debug_assert!(data < (1 << 6));
    encode_24_12(u16::from(data))
}

/// Encode 8 data bits as the 20-bit slot-type codeword. The four dropped
/// leading positions are systematic zeros of the (24,12) parent.
pub fn encode_20_8(data: u8) -> u32 {
    encode_24_12(u16::from(data)) & 0xF_FFFF
}

static TABLE_24_12: Lazy<Vec<u32>> =
    Lazy::new(|| (0u16..4096).map(encode_24_12).collect());

static TABLE_24_6: Lazy<Vec<u32>> = Lazy::new(|| (0u8..64).map(encode_24_6).collect());

static TABLE_20_8: Lazy<Vec<u32>> =
    Lazy::new(|| (0u16..256).map(|m| encode_20_8(m as u8)).collect());

fn nearest(table: &[u32], word: u32, max_dist: u32) -> Option<(u16, u32)> {
    let mut best = (0u16, u32::MAX);
    for (msg, &cw) in table.iter().enumerate() {
        let dist = (cw ^ word).count_ones();
        if dist < best.1 {
            best = (msg as u16, dist);
            if dist == 0 {
                break;
            }
        }
    }
    (best.1 <= max_dist).then_some(best)
}

/// Hard-decode a 24-bit word; returns (data, bits corrected) for up to
/// three errors, `None` beyond the guaranteed radius.
pub fn decode_24_12(word: u32) -> Option<(u16, u32)> {
    nearest(&TABLE_24_12, word & 0xFF_FFFF, 3)
}

pub fn decode_24_6(word: u32) -> Option<(u8, u32)> {
    nearest(&TABLE_24_6, word & 0xFF_FFFF, 3).map(|(m, d)| (m as u8, d))
}

pub fn decode_20_8(word: u32) -> Option<(u8, u32)> {
    nearest(&TABLE_20_8, word & 0xF_FFFF, 3).map(|(m, d)| (m as u8, d))
}

/// Result of a soft Golay decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftGolay {
    pub data: u16,
    /// Bits changed between the input hard decisions and the accepted codeword.
    pub fixed: u32,
}

fn chase(
    bits: &[u8],
    rel: &[u8],
    erasure: u8,
    lrp_count: usize,
    max_weight: u32,
    decode: impl Fn(u32) -> Option<(u16, u32)>,
    width: usize,
) -> Option<SoftGolay> {
    let word = bits
        .iter()
        .fold(0u32, |acc, &b| (acc << 1) | u32::from(b & 1));

    let mut order: Vec<usize> = (0..width).collect();
    order.sort_by_key(|&i| rel[i]);
    let lrp = &order[..lrp_count];

    let mut best: Option<(u32, u32, SoftGolay)> = None;
    for pattern in 0u32..(1 << lrp_count) {
        let weight = pattern.count_ones();
        if weight > max_weight {
            continue;
        }
        let mut cand = word;
        let mut penalty = 0u32;
        for (slot, &pos) in lrp.iter().enumerate() {
            if (pattern >> slot) & 1 == 1 {
                cand ^= 1 << (width - 1 - pos);
                if rel[pos] >= erasure {
                    penalty += 255 - u32::from(rel[pos]);
                }
            }
        }
        if let Some((data, _)) = decode(cand) {
            // `fixed` counts against the original hard decisions. Both
            // 24-bit variants index the parent (24,12) table.
            let cw = TABLE_24_12[data as usize];
            let result = SoftGolay {
                data,
                fixed: (cw ^ word).count_ones(),
            };
            let better = match &best {
                None => true,
                Some((p, w, _)) => penalty < *p || (penalty == *p && weight < *w),
            };
            if better {
                best = Some((penalty, weight, result));
                if penalty == 0 && weight == 0 {
                    break;
                }
            }
        }
    }
    best.map(|(_, _, r)| r)
}

/// Soft-decision Golay(24,6): candidates of weight ≤3 over the five
/// least-reliable positions.
pub fn soft_24_6(bits: &[u8], rel: &[u8], erasure: u8) -> Option<SoftGolay> {
    debug_assert_eq!(bits.len(), 24);
    chase(bits, rel, erasure, 5, 3, |w| {
        decode_24_6(w).map(|(m, d)| (u16::from(m), d))
    }, 24)
}

/// Soft-decision Golay(24,12): candidates of weight ≤4 over the six
/// least-reliable positions.
pub fn soft_24_12(bits: &[u8], rel: &[u8], erasure: u8) -> Option<SoftGolay> {
    debug_assert_eq!(bits.len(), 24);
    chase(bits, rel, erasure, 6, 4, decode_24_12, 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bits(word: u32, width: usize) -> Vec<u8> {
        (0..width)
            .rev()
            .map(|i| ((word >> i) & 1) as u8)
            .collect()
    }

    #[test]
    fn extended_codewords_have_even_weight() {
        for m in [0u16, 1, 0x5A3, 0xFFF, 0x800] {
            assert_eq!(encode_24_12(m).count_ones() % 2, 0);
        }
    }

    #[test]
    fn hard_decode_corrects_three_errors() {
        let cw = encode_24_12(0x9C1);
        let damaged = cw ^ (1 << 3) ^ (1 << 11) ^ (1 << 22);
        let (data, fixed) = decode_24_12(damaged).unwrap();
        assert_eq!(data, 0x9C1);
        assert_eq!(fixed, 3);
    }

    #[test]
    fn shortened_six_bit_code_round_trips() {
        for m in 0u8..64 {
            let cw = encode_24_6(m);
            assert_eq!(decode_24_6(cw), Some((m, 0)));
            assert_eq!(decode_24_6(cw ^ 0b101).map(|(d, _)| d), Some(m));
        }
    }

    #[test]
    fn slot_type_code_corrects_singles() {
        for pos in 0..20 {
            let cw = encode_20_8(0xB7);
            let (data, _) = decode_20_8(cw ^ (1 << pos)).unwrap();
            assert_eq!(data, 0xB7);
        }
    }

    #[test]
    fn soft_24_12_corrects_four_bit_burst() {
        // Four errors sit beyond the hard radius but all four positions
        // carry near-zero reliability, so the Chase pass recovers them.
        let cw = encode_24_12(0x5A3);
        let flips = [0usize, 5, 11, 23];
        let mut bits = to_bits(cw, 24);
        let mut rel = [250u8; 24];
        for &f in &flips {
            bits[f] ^= 1;
            rel[f] = 10;
        }
        let out = soft_24_12(&bits, &rel, 64).unwrap();
        assert_eq!(out.data, 0x5A3);
        assert_eq!(out.fixed, 4);
    }

    #[test]
    fn soft_success_set_contains_hard_success_set() {
        // Anything the hard decoder fixes, the soft decoder fixes too.
        let cw = encode_24_12(0x123);
        for flips in [vec![2usize], vec![4, 17], vec![1, 9, 20]] {
            let mut bits = to_bits(cw, 24);
            for &f in &flips {
                bits[f] ^= 1;
            }
            let word = bits.iter().fold(0u32, |a, &b| (a << 1) | u32::from(b));
            let hard = decode_24_12(word).unwrap();
            let soft = soft_24_12(&bits, &[128; 24], 64).unwrap();
            assert_eq!(soft.data, hard.0);
        }
    }
}
