//! Burst classification and the FEC/CRC dispatch table.
//!
//! Each burst type pins down the whole receive recipe: which FEC runs,
//! which CRC protects the result and under which protocol XOR mask, how
//! many payload octets come out, and where confirmed-data payload starts
//! inside the block.

use crate::errors::{DvrxError, FecError, FecKind};
use crate::fec::{bptc, convolutional, crc, reed_solomon, trellis34};

/// Declared burst type of a DMR data frame (slot-type data-type values),
/// with the confirmed variants split out because the preceding data
/// header, not the slot type, decides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstType {
    Pi,
    Vlc,
    Tlc,
    Csbk,
    MbcHeader,
    MbcContinuation,
    DataHeader,
    Rate12Unconfirmed,
    Rate12Confirmed,
    Rate34Unconfirmed,
    Rate34Confirmed,
    Rate1Unconfirmed,
    Rate1Confirmed,
    Usbd,
    Emb,
    Idle,
}

impl BurstType {
    /// Map the slot-type data-type nibble. Rate bursts map to their
    /// unconfirmed variant; the assembler upgrades when the data header
    /// declared confirmed delivery.
    pub fn from_data_type(dt: u8) -> Option<Self> {
        Some(match dt {
            0x0 => BurstType::Pi,
            0x1 => BurstType::Vlc,
            0x2 => BurstType::Tlc,
            0x3 => BurstType::Csbk,
            0x4 => BurstType::MbcHeader,
            0x5 => BurstType::MbcContinuation,
            0x6 => BurstType::DataHeader,
            0x7 => BurstType::Rate12Unconfirmed,
            0x8 => BurstType::Rate34Unconfirmed,
            0x9 => BurstType::Idle,
            0xA => BurstType::Rate1Unconfirmed,
            0xB => BurstType::Usbd,
            _ => return None,
        })
    }

    pub fn confirmed(self) -> Self {
        match self {
            BurstType::Rate12Unconfirmed => BurstType::Rate12Confirmed,
            BurstType::Rate34Unconfirmed => BurstType::Rate34Confirmed,
            BurstType::Rate1Unconfirmed => BurstType::Rate1Confirmed,
            other => other,
        }
    }

    pub fn is_data_block(self) -> bool {
        matches!(
            self,
            BurstType::Rate12Unconfirmed
                | BurstType::Rate12Confirmed
                | BurstType::Rate34Unconfirmed
                | BurstType::Rate34Confirmed
                | BurstType::Rate1Unconfirmed
                | BurstType::Rate1Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecPath {
    Bptc196,
    Bptc196Rs,
    Trellis34,
    Uncoded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcScheme {
    None,
    /// No CRC on air; the framer reports OK.
    ReportOk,
    Crc9 { mask: u16 },
    Crc16 { mask: u16 },
    /// Reed–Solomon parity standing in for a 24-bit CRC.
    RsParity { mask: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct BurstSpec {
    pub fec: FecPath,
    pub crc: CrcScheme,
    /// Block length in octets after FEC.
    pub block_len: usize,
    /// First payload octet of a confirmed block.
    pub pdu_start: usize,
}

pub fn spec(burst: BurstType) -> BurstSpec {
    use BurstType::*;
    match burst {
        Pi => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc16 { mask: 0x6969 },
            block_len: 12,
            pdu_start: 0,
        },
        Vlc => BurstSpec {
            fec: FecPath::Bptc196Rs,
            crc: CrcScheme::RsParity { mask: 0x96_9696 },
            block_len: 12,
            pdu_start: 0,
        },
        Tlc => BurstSpec {
            fec: FecPath::Bptc196Rs,
            crc: CrcScheme::RsParity { mask: 0x99_9999 },
            block_len: 12,
            pdu_start: 0,
        },
        Csbk => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc16 { mask: 0xA5A5 },
            block_len: 12,
            pdu_start: 0,
        },
        MbcHeader => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc16 { mask: 0xAAAA },
            block_len: 12,
            pdu_start: 0,
        },
        // Continuation CRC spans the assembled PDU, checked at assembly.
        MbcContinuation => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::None,
            block_len: 12,
            pdu_start: 0,
        },
        DataHeader => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc16 { mask: 0xCCCC },
            block_len: 12,
            pdu_start: 0,
        },
        Rate12Unconfirmed => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::ReportOk,
            block_len: 12,
            pdu_start: 0,
        },
        Rate12Confirmed => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc9 { mask: 0x0F0 },
            block_len: 12,
            pdu_start: 2,
        },
        Rate34Unconfirmed => BurstSpec {
            fec: FecPath::Trellis34,
            crc: CrcScheme::None,
            block_len: 18,
            pdu_start: 0,
        },
        Rate34Confirmed => BurstSpec {
            fec: FecPath::Trellis34,
            crc: CrcScheme::Crc9 { mask: 0x1FF },
            block_len: 18,
            pdu_start: 2,
        },
        Rate1Unconfirmed => BurstSpec {
            fec: FecPath::Uncoded,
            crc: CrcScheme::None,
            block_len: 24,
            pdu_start: 0,
        },
        Rate1Confirmed => BurstSpec {
            fec: FecPath::Uncoded,
            crc: CrcScheme::Crc9 { mask: 0x10F },
            block_len: 24,
            pdu_start: 2,
        },
        Usbd => BurstSpec {
            fec: FecPath::Bptc196,
            crc: CrcScheme::Crc16 { mask: 0x3333 },
            block_len: 12,
            pdu_start: 0,
        },
        Emb | Idle => BurstSpec {
            fec: FecPath::Uncoded,
            crc: CrcScheme::None,
            block_len: 0,
            pdu_start: 0,
        },
    }
}

/// A burst after FEC and CRC handling.
#[derive(Debug, Clone)]
pub struct DecodedBurst {
    pub burst: BurstType,
    /// Full decoded block (12/18/24 octets).
    pub bytes: Vec<u8>,
    pub crc_ok: bool,
    pub fec_corrected: usize,
    /// Data block serial number of confirmed blocks.
    pub dbsn: Option<u8>,
}

/// Run the dispatch-table recipe for one 196-bit info frame.
pub fn decode_burst(
    burst: BurstType,
    info_bits: &[u8],
    rel: &[u8],
    erasure: u8,
) -> Result<DecodedBurst, DvrxError> {
    debug_assert_eq!(info_bits.len(), 196);
    let table = spec(burst);

    let (mut bits, fec_corrected): (Vec<u8>, usize) = match table.fec {
        FecPath::Bptc196 | FecPath::Bptc196Rs => {
            let out = bptc::bptc_196_96(info_bits);
            if out.irrecoverable {
                return Err(FecError::Irrecoverable {
                    kind: FecKind::Bptc196,
                    residual_errors: out.corrected,
                }
                .into());
            }
            (out.info, out.corrected)
        }
        FecPath::Trellis34 => {
            let mut dibits = [0u8; 98];
            let mut drel = [0u8; 98];
            for i in 0..98 {
                dibits[i] = (info_bits[2 * i] << 1) | info_bits[2 * i + 1];
                drel[i] = rel[2 * i].min(rel[2 * i + 1]);
            }
            let bytes = trellis34::decode_soft(&dibits, &drel, erasure)?;
            (crc::bytes_to_bits(&bytes), 0)
        }
        FecPath::Uncoded => (info_bits[..192].to_vec(), 0),
    };

    let mut dbsn = None;
    let crc_ok = match table.crc {
        CrcScheme::None => true,
        CrcScheme::ReportOk => true,
        CrcScheme::Crc9 { mask } => {
            // Confirmed layout: 7-bit DBSN, 9-bit CRC, then payload. The
            // CRC spans the information bits excluding the DBSN.
            dbsn = Some(crc::bits_to_u32(&bits[..7]) as u8);
            let extracted = crc::bits_to_u32(&bits[7..16]) as u16;
            let computed = crc::crc9(&bits[16..]) ^ mask;
            extracted == computed
        }
        CrcScheme::Crc16 { mask } => {
            let span = bits.len() - 16;
            let extracted = crc::bits_to_u32(&bits[span..]) as u16;
            let computed = crc::crc16(&bits[..span]) ^ mask;
            extracted == computed
        }
        CrcScheme::RsParity { mask } => {
            let mut block = [0u8; 12];
            block.copy_from_slice(&crc::bits_to_bytes(&bits)[..12]);
            for (i, b) in block[9..].iter_mut().enumerate() {
                *b ^= ((mask >> (8 * (2 - i))) & 0xFF) as u8;
            }
            match reed_solomon::decode_12_9(&mut block) {
                reed_solomon::RsStatus::Clean | reed_solomon::RsStatus::Corrected(_) => {
                    bits = crc::bytes_to_bits(&block);
                    true
                }
                reed_solomon::RsStatus::Irrecoverable => false,
            }
        }
    };

    let mut bytes = crc::bits_to_bytes(&bits);
    bytes.truncate(table.block_len);
    bytes.resize(table.block_len, 0);

    Ok(DecodedBurst {
        burst,
        bytes,
        crc_ok,
        fec_corrected,
        dbsn,
    })
}

/// 1/2-rate trellis decode for P25 TSBK-style dibit payloads.
pub fn decode_p25_half_rate(
    dibits: &[u8; 98],
    rel: &[u8; 98],
    erasure: u8,
) -> Result<[u8; 12], DvrxError> {
    convolutional::decode_soft(dibits, rel, erasure)
        .or_else(|_| convolutional::decode(dibits))
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::crc::{bytes_to_bits, crc16};

    fn build_crc16_burst(payload: [u8; 10], mask: u16) -> [u8; 196] {
        let mut bits = bytes_to_bits(&payload);
        let c = crc16(&bits) ^ mask;
        for i in (0..16).rev() {
            bits.push(((c >> i) & 1) as u8);
        }
        bptc::encode_196_96(&bits, [0, 0, 0])
    }

    #[test]
    fn csbk_recipe_checks_masked_crc16() {
        let payload = [0xBD, 0x00, 0x12, 0x34, 0x56, 0x78, 0x00, 0x01, 0x02, 0x03];
        let raw = build_crc16_burst(payload, 0xA5A5);
        let rel = [200u8; 196];
        let out = decode_burst(BurstType::Csbk, &raw, &rel, 64).unwrap();
        assert!(out.crc_ok);
        assert_eq!(&out.bytes[..10], &payload);

        // Same burst under the wrong type has the wrong mask.
        let out = decode_burst(BurstType::DataHeader, &raw, &rel, 64).unwrap();
        assert!(!out.crc_ok);
    }

    #[test]
    fn confirmed_rate_half_extracts_dbsn() {
        let dbsn = 5u8;
        let data = [0x11u8; 10];
        let data_bits = bytes_to_bits(&data);
        let c = crate::fec::crc::crc9(&data_bits) ^ 0x0F0;
        let mut bits = Vec::with_capacity(96);
        for i in (0..7).rev() {
            bits.push((dbsn >> i) & 1);
        }
        for i in (0..9).rev() {
            bits.push(((c >> i) & 1) as u8);
        }
        bits.extend_from_slice(&data_bits);
        let raw = bptc::encode_196_96(&bits, [0, 0, 0]);
        let rel = [180u8; 196];
        let out = decode_burst(BurstType::Rate12Confirmed, &raw, &rel, 64).unwrap();
        assert!(out.crc_ok);
        assert_eq!(out.dbsn, Some(5));
        assert_eq!(&out.bytes[2..], &data);
    }

    #[test]
    fn link_control_passes_through_reed_solomon() {
        let lc = [0x00u8, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00, 0x23, 0x29];
        let mut cw = reed_solomon::encode_12_9(&lc);
        for (i, b) in cw[9..].iter_mut().enumerate() {
            *b ^= [0x96, 0x96, 0x96][i];
        }
        let raw = bptc::encode_196_96(&bytes_to_bits(&cw), [0, 0, 0]);
        let rel = [220u8; 196];
        let out = decode_burst(BurstType::Vlc, &raw, &rel, 64).unwrap();
        assert!(out.crc_ok);
        assert_eq!(&out.bytes[..9], &lc);
    }

    #[test]
    fn slot_type_nibbles_map_to_burst_types() {
        assert_eq!(BurstType::from_data_type(0x3), Some(BurstType::Csbk));
        assert_eq!(BurstType::from_data_type(0x9), Some(BurstType::Idle));
        assert_eq!(BurstType::from_data_type(0xC), None);
        assert_eq!(
            BurstType::from_data_type(0x7).map(BurstType::confirmed),
            Some(BurstType::Rate12Confirmed)
        );
    }
}
