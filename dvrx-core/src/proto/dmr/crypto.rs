//! Data-PDU keystream application.
//!
//! A proprietary header ahead of the data blocks declares the algorithm,
//! key id and message indicator; after the PDU CRC-32 verifies (always on
//! ciphertext) the keystream is XORed across the window
//! `[data_ks_start, total − pad_octets − 4]`. Missing keys leave the
//! payload untouched and report `false`.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use des::Des;
use log::debug;

use crate::frame::assembler::CryptoParams;
use crate::keystore::KeyStore;

pub const ALG_BASIC_PRIVACY: u8 = 0;
pub const ALG_RC4: u8 = 1;
pub const ALG_DES_OFB: u8 = 2;
pub const ALG_AES128_OFB: u8 = 4;
pub const ALG_AES256_OFB: u8 = 5;

/// Expand a 32-bit message indicator with the shared LFSR
/// (taps 31, 21, 1, 0), yielding `32 + extra_bits` bits as bytes.
fn lfsr_expand(mi: u32, extra_bits: usize) -> Vec<u8> {
    let mut bits = Vec::with_capacity(32 + extra_bits);
    for i in (0..32).rev() {
        bits.push(((mi >> i) & 1) as u8);
    }
    let mut state = mi;
    for _ in 0..extra_bits {
        let fb = ((state >> 31) ^ (state >> 21) ^ (state >> 1) ^ state) & 1;
        state = (state << 1) | fb;
        bits.push(fb as u8);
    }
    bits.chunks(8)
        .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b))
        .collect()
}

/// RC4 keystream for an arbitrary-length key (the DMR variant uses a
/// nine-byte {key, MI} IV).
fn rc4_keystream(key: &[u8], count: usize) -> Vec<u8> {
    let mut s: [u8; 256] = core::array::from_fn(|i| i as u8);
    let mut j = 0u8;
    for i in 0..256 {
        j = j
            .wrapping_add(s[i])
            .wrapping_add(key[i % key.len()]);
        s.swap(i, usize::from(j));
    }
    let mut out = Vec::with_capacity(count);
    let (mut i, mut j) = (0u8, 0u8);
    for _ in 0..count {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[usize::from(i)]);
        s.swap(usize::from(i), usize::from(j));
        let idx = s[usize::from(i)].wrapping_add(s[usize::from(j)]);
        out.push(s[usize::from(idx)]);
    }
    out
}

/// OFB keystream from any 8-byte-block cipher.
fn ofb_keystream_des(key: &[u8; 8], iv: [u8; 8], count: usize) -> Vec<u8> {
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(&iv);
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out.truncate(count);
    out
}

fn ofb_keystream_aes128(key: &[u8; 16], iv: [u8; 16], count: usize) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(&iv);
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out.truncate(count);
    out
}

fn ofb_keystream_aes256(key: &[u8; 32], iv: [u8; 16], count: usize) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(&iv);
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out.truncate(count);
    out
}

/// Build the keystream for the declared algorithm, or `None` when the key
/// store has no matching material.
fn keystream(params: CryptoParams, keys: &KeyStore, count: usize) -> Option<Vec<u8>> {
    match params.alg {
        ALG_BASIC_PRIVACY => {
            let key = keys.bp_key(params.keyid)?;
            let pattern = key.to_be_bytes();
            Some((0..count).map(|i| pattern[i % 2]).collect())
        }
        ALG_RC4 => {
            let key = keys.symmetric_key(params.keyid)?;
            if key.len() < 5 {
                return None;
            }
            let mut iv = [0u8; 9];
            iv[..5].copy_from_slice(&key[..5]);
            iv[5..].copy_from_slice(&params.mi.to_be_bytes());
            Some(rc4_keystream(&iv, count))
        }
        ALG_DES_OFB => {
            let key = keys.symmetric_key(params.keyid)?;
            if key.len() < 8 {
                return None;
            }
            let mut k = [0u8; 8];
            k.copy_from_slice(&key[..8]);
            let iv_bytes = lfsr_expand(params.mi, 32);
            let mut iv = [0u8; 8];
            iv.copy_from_slice(&iv_bytes);
            Some(ofb_keystream_des(&k, iv, count))
        }
        ALG_AES128_OFB => {
            let key = keys.aes_key_128(params.keyid)?;
            let iv_bytes = lfsr_expand(params.mi, 96);
            let mut iv = [0u8; 16];
            iv.copy_from_slice(&iv_bytes);
            Some(ofb_keystream_aes128(&key, iv, count))
        }
        ALG_AES256_OFB => {
            let key = keys.aes_key_256(params.keyid)?;
            let iv_bytes = lfsr_expand(params.mi, 96);
            let mut iv = [0u8; 16];
            iv.copy_from_slice(&iv_bytes);
            Some(ofb_keystream_aes256(&key, iv, count))
        }
        _ => None,
    }
}

/// Apply the keystream across the PDU payload in place. Returns whether
/// decryption actually ran. `payload` includes the trailing CRC-32, which
/// is never covered; neither are the pad octets before it.
pub fn decrypt_payload(
    params: CryptoParams,
    keys: &KeyStore,
    payload: &mut [u8],
    data_ks_start: usize,
    pad_octets: usize,
) -> bool {
    let end = payload
        .len()
        .saturating_sub(pad_octets + 4)
        .max(data_ks_start);
    let window = end - data_ks_start;
    if window == 0 {
        return false;
    }
    match keystream(params, keys, window) {
        Some(ks) => {
            for (b, k) in payload[data_ks_start..end].iter_mut().zip(&ks) {
                *b ^= k;
            }
            true
        }
        None => {
            debug!(
                "no key material for alg {:#04x} keyid {:#06x}",
                params.alg, params.keyid
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc4_matches_the_classic_test_vector() {
        // Key "Key" → keystream EB 9F 77 81 B7 34 CA 72 A7 19.
        let ks = rc4_keystream(b"Key", 10);
        assert_eq!(
            ks,
            vec![0xEB, 0x9F, 0x77, 0x81, 0xB7, 0x34, 0xCA, 0x72, 0xA7, 0x19]
        );
    }

    #[test]
    fn lfsr_carries_the_mi_through() {
        let iv = lfsr_expand(0xDEADBEEF, 32);
        assert_eq!(iv.len(), 8);
        assert_eq!(&iv[..4], &0xDEADBEEFu32.to_be_bytes());
        // Expansion must be deterministic.
        assert_eq!(iv, lfsr_expand(0xDEADBEEF, 32));

        let long = lfsr_expand(0xDEADBEEF, 96);
        assert_eq!(long.len(), 16);
        assert_eq!(&long[..4], &iv[..4]);
    }

    #[test]
    fn decrypt_is_an_involution_over_the_window() {
        let mut keys = KeyStore::new();
        keys.load_symmetric(0x10, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        let params = CryptoParams {
            alg: ALG_RC4,
            keyid: 0x10,
            mi: 0x12345678,
        };

        let original: Vec<u8> = (0u8..30).collect();
        let mut work = original.clone();
        assert!(decrypt_payload(params, &keys, &mut work, 2, 0));
        assert_ne!(work, original);
        // CRC tail and the prefix stay untouched.
        assert_eq!(&work[..2], &original[..2]);
        assert_eq!(&work[26..], &original[26..]);
        assert!(decrypt_payload(params, &keys, &mut work, 2, 0));
        assert_eq!(work, original);
    }

    #[test]
    fn missing_key_leaves_payload_alone() {
        let keys = KeyStore::new();
        let params = CryptoParams {
            alg: ALG_AES256_OFB,
            keyid: 0x99,
            mi: 1,
        };
        let mut payload = vec![0xAA; 16];
        assert!(!decrypt_payload(params, &keys, &mut payload, 0, 0));
        assert!(payload.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn aes_ofb_round_trips() {
        let mut keys = KeyStore::new();
        keys.load_aes_slots(7, [1, 2, 3, 4]);
        let params = CryptoParams {
            alg: ALG_AES256_OFB,
            keyid: 7,
            mi: 0xCAFE,
        };
        let original = vec![0x55u8; 40];
        let mut work = original.clone();
        assert!(decrypt_payload(params, &keys, &mut work, 0, 4));
        assert!(decrypt_payload(params, &keys, &mut work, 0, 4));
        assert_eq!(work, original);
    }
}
