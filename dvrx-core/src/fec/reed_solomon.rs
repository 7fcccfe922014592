//! Reed–Solomon(12,9) link-control code.
//!
//! Twelve 8-bit symbols: nine data, three parity, minimum distance four,
//! correcting one symbol error. The field is GF(2⁸) modulo x⁸+x⁴+x³+x²+1
//! and the generator polynomial has roots α⁰, α¹, α².

use once_cell::sync::Lazy;

const FIELD_POLY: u16 = 0x11D;

struct Gf {
    exp: [u8; 512],
    log: [u8; 256],
}

static GF: Lazy<Gf> = Lazy::new(|| {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x = 1u16;
    for i in 0..255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= FIELD_POLY;
        }
    }
    // Double-length exponent table avoids a modulo in multiply.
    for i in 255..512 {
        exp[i] = exp[i - 255];
    }
    Gf { exp, log }
});

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let gf = &*GF;
    gf.exp[usize::from(gf.log[a as usize]) + usize::from(gf.log[b as usize])]
}

fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert_ne!(b, 0);
    if a == 0 {
        return 0;
    }
    let gf = &*GF;
    gf.exp[255 + usize::from(gf.log[a as usize]) - usize::from(gf.log[b as usize])]
}

fn gf_pow_alpha(e: usize) -> u8 {
    GF.exp[e % 255]
}

/// Generator coefficients of ∏(x+αⁱ) for i = 0..3, low degree first.
fn generator() -> [u8; 4] {
    let mut g = [0u8; 4];
    g[0] = 1;
    for (deg, i) in (0..3).enumerate() {
        let root = gf_pow_alpha(i);
        for j in (0..=deg).rev() {
            g[j + 1] ^= g[j];
            g[j] = gf_mul(g[j], root);
        }
    }
    g
}

/// Append the three parity symbols to nine data symbols.
pub fn encode_12_9(data: &[u8; 9]) -> [u8; 12] {
    let g = generator();
    let mut out = [0u8; 12];
    out[..9].copy_from_slice(data);

    // Systematic remainder of data(x)·x³ divided by g(x).
    let mut rem = [0u8; 3];
    for &d in data {
        let fb = d ^ rem[0];
        rem[0] = rem[1] ^ gf_mul(fb, g[2]);
        rem[1] = rem[2] ^ gf_mul(fb, g[1]);
        rem[2] = gf_mul(fb, g[0]);
    }
    out[9..].copy_from_slice(&rem);
    out
}

/// Outcome of an RS(12,9) decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsStatus {
    Clean,
    /// One symbol corrected in place at the reported index.
    Corrected(usize),
    Irrecoverable,
}

/// Correct at most one symbol error in a 12-byte codeword.
pub fn decode_12_9(cw: &mut [u8; 12]) -> RsStatus {
    // Syndromes S_j = r(α^j) for j = 0..2. Codeword index 0 is the
    // highest-degree coefficient (x¹¹).
    let mut syn = [0u8; 3];
    for (j, s) in syn.iter_mut().enumerate() {
        let mut acc = 0u8;
        for &sym in cw.iter() {
            acc = gf_mul(acc, gf_pow_alpha(j)) ^ sym;
        }
        *s = acc;
    }

    if syn == [0, 0, 0] {
        return RsStatus::Clean;
    }
    if syn[0] == 0 || syn[1] == 0 {
        return RsStatus::Irrecoverable;
    }
    // Single error e at degree p: S_j = e·α^(j·p); consistency requires
    // S₁² = S₀·S₂.
    if gf_mul(syn[1], syn[1]) != gf_mul(syn[0], syn[2]) {
        return RsStatus::Irrecoverable;
    }
    let loc = gf_div(syn[1], syn[0]);
    let degree = usize::from(GF.log[loc as usize]);
    if degree > 11 {
        return RsStatus::Irrecoverable;
    }
    let index = 11 - degree;
    cw[index] ^= syn[0];
    RsStatus::Corrected(index)
}
