//! Dibit slicing of differential phasors.
//!
//! After the Costas loop the QPSK decision regions sit on the diagonals;
//! the quadrant picks the dibit and the distance from the decision
//! boundaries, scaled by magnitude, becomes a 0..255 reliability for the
//! soft decoders downstream.

use num_complex::Complex64;

/// One sliced symbol: a hard dibit plus its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dibit {
    pub value: u8,
    pub reliability: u8,
}

/// Gray-coded quadrant mapping: +I+Q → 00, −I+Q → 01, −I−Q → 11, +I−Q → 10.
pub fn slice(symbol: Complex64) -> Dibit {
    let value = match (symbol.re >= 0.0, symbol.im >= 0.0) {
        (true, true) => 0b00,
        (false, true) => 0b01,
        (false, false) => 0b11,
        (true, false) => 0b10,
    };

    let a = symbol.re.abs();
    let b = symbol.im.abs();
    let max = a.max(b);
    let reliability = if max <= f64::EPSILON {
        0
    } else {
        // Diagonal confidence (min/max → 1.0 on the decision diagonal)
        // weighted by how much signal is actually present.
        let ratio = a.min(b) / max;
        let level = symbol.norm().min(1.0);
        (255.0 * ratio * level).round() as u8
    };

    Dibit { value, reliability }
}

/// Slice a block of symbols into separate dibit/reliability streams.
pub fn slice_block(symbols: &[Complex64], dibits: &mut Vec<u8>, rel: &mut Vec<u8>) {
    for &s in symbols {
        let d = slice(s);
        dibits.push(d.value);
        rel.push(d.reliability);
    }
}
