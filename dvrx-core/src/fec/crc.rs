//! CRC family used by the burst dispatch table.
//!
//! Every variant is computed MSB-first over an explicit bit window, with
//! zero initial value and no output inversion. Protocol XOR masks are part
//! of the burst-type table and are applied by the caller, never here.

/// Bitwise MSB-first CRC over a window of bits (one bit per input byte).
///
/// `poly` is given without its leading coefficient, e.g. 0x1021 for the
/// CCITT 16-bit polynomial.
fn crc_bits(bits: &[u8], width: u32, poly: u32) -> u32 {
    debug_assert!(width <= 32);
    let top = 1u64 << (width - 1);
    let mask = if width == 32 {
        u64::from(u32::MAX)
    } else {
        (1u64 << width) - 1
    };
    let mut crc = 0u64;
    for &bit in bits {
        let fb = ((crc & top) != 0) ^ (bit & 1 == 1);
        crc = (crc << 1) & mask;
        if fb {
            crc ^= u64::from(poly);
        }
    }
    crc as u32
}

pub fn crc5(bits: &[u8]) -> u8 {
    crc_bits(bits, 5, 0x15) as u8
}

pub fn crc8(bits: &[u8]) -> u8 {
    crc_bits(bits, 8, 0x07) as u8
}

/// 9-bit CRC of the confirmed-data family (x⁹+x⁶+x⁴+x³+1).
pub fn crc9(bits: &[u8]) -> u16 {
    crc_bits(bits, 9, 0x059) as u16
}

pub fn crc12(bits: &[u8]) -> u16 {
    crc_bits(bits, 12, 0x80F) as u16
}

pub fn crc16(bits: &[u8]) -> u16 {
    crc_bits(bits, 16, 0x1021) as u16
}

pub fn crc32(bits: &[u8]) -> u32 {
    crc_bits(bits, 32, 0x04C1_1DB7)
}

/// Expand bytes into MSB-first bits. The CRC kernels work on bit windows
/// because several spans are not byte aligned.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
        .collect()
}

/// Pack MSB-first bits into bytes, zero-padding the tail.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = 0u8;
            for (i, &b) in chunk.iter().enumerate() {
                byte |= (b & 1) << (7 - i);
            }
            byte
        })
        .collect()
}

/// Read an MSB-first unsigned field out of a bit window.
pub fn bits_to_u32(bits: &[u8]) -> u32 {
    debug_assert!(bits.len() <= 32);
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | u32::from(b & 1))
}
