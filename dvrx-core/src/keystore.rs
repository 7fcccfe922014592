//! Key store: read-only after load.
//!
//! Keys arrive from an external loader before the pipeline starts;
//! everything here afterwards is a pure lookup. AES material is assembled
//! from four 64-bit slots per key id, matching how the loader delivers it.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct KeyStore {
    symmetric: HashMap<u16, Vec<u8>>,
    aes_slots: HashMap<u16, [u64; 4]>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_symmetric(&mut self, keyid: u16, key: Vec<u8>) {
        self.symmetric.insert(keyid, key);
    }

    pub fn load_aes_slots(&mut self, keyid: u16, slots: [u64; 4]) {
        self.aes_slots.insert(keyid, slots);
    }

    pub fn symmetric_key(&self, keyid: u16) -> Option<&[u8]> {
        self.symmetric.get(&keyid).map(Vec::as_slice)
    }

    pub fn has_symmetric(&self, keyid: u16) -> bool {
        self.symmetric.contains_key(&keyid)
    }

    /// 16-bit basic-privacy key, taken from the first two loaded bytes.
    pub fn bp_key(&self, keyid: u16) -> Option<u16> {
        let key = self.symmetric.get(&keyid)?;
        match key.as_slice() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    pub fn aes_loaded(&self, keyid: u16) -> bool {
        self.aes_slots.contains_key(&keyid)
    }

    /// AES-128 key from the first two slots.
    pub fn aes_key_128(&self, keyid: u16) -> Option<[u8; 16]> {
        let slots = self.aes_slots.get(&keyid)?;
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&slots[0].to_be_bytes());
        key[8..].copy_from_slice(&slots[1].to_be_bytes());
        Some(key)
    }

    /// AES-256 key from all four slots.
    pub fn aes_key_256(&self, keyid: u16) -> Option<[u8; 32]> {
        let slots = self.aes_slots.get(&keyid)?;
        let mut key = [0u8; 32];
        for (i, slot) in slots.iter().enumerate() {
            key[i * 8..(i + 1) * 8].copy_from_slice(&slot.to_be_bytes());
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_key_assembles_from_slots() {
        let mut ks = KeyStore::new();
        ks.load_aes_slots(9, [0x0001020304050607, 0x08090A0B0C0D0E0F, 0, 0]);
        let key = ks.aes_key_128(9).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[15], 0x0F);
        assert!(ks.aes_loaded(9));
        assert!(!ks.aes_loaded(10));
    }

    #[test]
    fn bp_key_needs_two_bytes() {
        let mut ks = KeyStore::new();
        ks.load_symmetric(1, vec![0x12]);
        assert_eq!(ks.bp_key(1), None);
        ks.load_symmetric(2, vec![0xAB, 0xCD, 0xEF]);
        assert_eq!(ks.bp_key(2), Some(0xABCD));
    }
}
