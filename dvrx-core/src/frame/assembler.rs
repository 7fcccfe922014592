//! Multi-block data-PDU assembly, one state machine per TDMA slot.
//!
//! The assembler collects data blocks between a data header and the
//! declared block count, enforces confirmed-data DBSN sequencing and
//! CRC-9s, verifies the PDU CRC-32 over the byte-swapped ordering, and
//! hands the finished PDU up for SAP dispatch. MBC and UDT flows share
//! the same per-slot machine.

use log::{debug, warn};

use crate::config::TrunkConfig;
use crate::errors::FrameError;
use crate::fec::crc::{bytes_to_bits, crc16, crc32};
use crate::frame::burst::{spec, DecodedBurst};

/// Data packet format from the header DPF nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dpf {
    Udt,
    Response,
    Unconfirmed,
    Confirmed,
    ShortDataDefined,
    ShortDataRaw,
    Proprietary,
    Reserved(u8),
}

impl Dpf {
    pub fn from_nibble(n: u8) -> Self {
        match n & 0xF {
            0x0 => Dpf::Udt,
            0x1 => Dpf::Response,
            0x2 => Dpf::Unconfirmed,
            0x3 => Dpf::Confirmed,
            0xD => Dpf::ShortDataDefined,
            0xE => Dpf::ShortDataRaw,
            0xF => Dpf::Proprietary,
            other => Dpf::Reserved(other),
        }
    }
}

/// Parsed 12-octet data header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
    pub dpf: Dpf,
    pub sap: u8,
    pub group: bool,
    pub response_requested: bool,
    pub blocks_to_follow: u8,
    pub pad_octets: u8,
    pub dst: u32,
    pub src: u32,
    pub confirmed: bool,
    /// UDT format nibble (UDT headers only).
    pub udt_format: u8,
    /// UDT appended-block count; 3 is the reserved value.
    pub udt_uab: u8,
}

impl DataHeader {
    pub fn parse(b: &[u8]) -> Self {
        debug_assert!(b.len() >= 12);
        let dpf = Dpf::from_nibble(b[0]);
        Self {
            dpf,
            sap: b[1] >> 4,
            group: b[0] & 0x80 != 0,
            response_requested: b[0] & 0x40 != 0,
            blocks_to_follow: b[8] & 0x7F,
            pad_octets: (b[0] & 0x10) | (b[1] & 0x0F),
            dst: u32::from(b[2]) << 16 | u32::from(b[3]) << 8 | u32::from(b[4]),
            src: u32::from(b[5]) << 16 | u32::from(b[6]) << 8 | u32::from(b[7]),
            confirmed: dpf == Dpf::Confirmed,
            udt_format: b[1] & 0x0F,
            udt_uab: b[8] & 0x03,
        }
    }
}

/// Encryption parameters declared by a preceding proprietary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoParams {
    pub alg: u8,
    pub keyid: u16,
    pub mi: u32,
}

/// A finished PDU ready for SAP dispatch.
#[derive(Debug, Clone)]
pub enum AssembledPdu {
    Data {
        header: DataHeader,
        /// Payload octets (pdu_start applied per block), CRC-32 included
        /// in the final four octets.
        payload: Vec<u8>,
        crypto: Option<CryptoParams>,
    },
    Mbc {
        header: Vec<u8>,
        continuation: Vec<u8>,
    },
    Udt {
        header: DataHeader,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HeaderReceived,
    Collecting,
}

const MAX_BLOCKS: usize = 127;
const MAX_BLOCK_LEN: usize = 24;
const SUPERFRAME_CAP: usize = MAX_BLOCKS * MAX_BLOCK_LEN;

/// Per-slot assembler.
pub struct SlotAssembler {
    state: State,
    header: Option<DataHeader>,
    crypto: Option<CryptoParams>,
    superframe: Vec<u8>,
    block_counter: usize,
    expected_dbsn: Option<u8>,
    block_len: usize,
    // MBC side: header block plus up to four continuations.
    mbc_header: Option<Vec<u8>>,
    mbc_blocks: Vec<u8>,
    // UDT appended blocks accumulate here.
    udt_payload: Vec<u8>,
}

impl Default for SlotAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotAssembler {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header: None,
            crypto: None,
            superframe: Vec::new(),
            block_counter: 0,
            expected_dbsn: None,
            block_len: 12,
            mbc_header: None,
            mbc_blocks: Vec::new(),
            udt_payload: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn block_counter(&self) -> usize {
        self.block_counter
    }

    /// Whether data blocks on this slot should decode as confirmed.
    pub fn confirmed(&self) -> bool {
        self.header.as_ref().map(|h| h.confirmed).unwrap_or(false)
    }

    /// Proprietary headers ride between the data header and the blocks,
    /// declaring the crypto parameters for the PDU.
    pub fn on_proprietary_header(&mut self, params: CryptoParams) {
        self.crypto = Some(params);
    }

    /// Data header: arm the machine. A bad-CRC header only arms in
    /// relaxed mode.
    pub fn on_data_header(
        &mut self,
        decoded: &DecodedBurst,
        cfg: &TrunkConfig,
    ) -> Result<(), FrameError> {
        if !decoded.crc_ok && !cfg.dmr_crc_relaxed {
            return Err(FrameError::CrcMismatch {
                kind: crate::errors::CrcKind::Crc16,
                extracted: 0,
                computed: 0,
            });
        }
        let header = DataHeader::parse(&decoded.bytes);
        if usize::from(header.blocks_to_follow) > MAX_BLOCKS {
            self.reset();
            return Ok(());
        }
        debug!(
            "data header: dpf {:?} sap {} dst {} src {} btf {}",
            header.dpf, header.sap, header.dst, header.src, header.blocks_to_follow
        );
        self.superframe.clear();
        self.udt_payload.clear();
        self.block_counter = 0;
        self.expected_dbsn = None;
        self.header = Some(header);
        self.state = State::HeaderReceived;
        Ok(())
    }

    /// One rate-1/2, 3/4 or 1 data block. Returns a finished PDU when the
    /// declared block count is reached.
    pub fn on_data_block(
        &mut self,
        decoded: &DecodedBurst,
        cfg: &TrunkConfig,
    ) -> Result<Option<AssembledPdu>, FrameError> {
        let header = match self.header.clone() {
            Some(h) => h,
            None => return Ok(None), // blocks with no header are noise
        };
        let table = spec(decoded.burst);
        if !matches!(table.block_len, 12 | 18 | 24) {
            self.reset();
            return Ok(None);
        }
        if self.state == State::HeaderReceived {
            self.block_len = table.block_len;
            self.state = State::Collecting;
        }

        if header.dpf == Dpf::Udt {
            return self.on_udt_block(decoded, &header);
        }

        if header.confirmed {
            if !decoded.crc_ok {
                return Err(FrameError::CrcMismatch {
                    kind: crate::errors::CrcKind::Crc9,
                    extracted: 0,
                    computed: 0,
                });
            }
            let got = decoded.dbsn.unwrap_or(0);
            match self.expected_dbsn {
                None => self.expected_dbsn = Some((got + 1) & 0x7F),
                Some(expected) => {
                    if got != expected {
                        let err = FrameError::OutOfSequence {
                            expected_dbsn: expected,
                            got_dbsn: got,
                        };
                        if cfg.strict_data_sequence {
                            self.reset();
                            return Err(err);
                        }
                        warn!("{err}; continuing in relaxed mode");
                        self.expected_dbsn = Some((got + 1) & 0x7F);
                    } else {
                        self.expected_dbsn = Some((expected + 1) & 0x7F);
                    }
                }
            }
        }

        let offset = self.block_counter * self.block_len;
        if offset + self.block_len > SUPERFRAME_CAP
            || self.block_counter >= usize::from(header.blocks_to_follow.max(1))
        {
            self.reset();
            return Err(FrameError::SuperframeOverflow {
                block: self.block_counter,
                capacity: SUPERFRAME_CAP,
            });
        }
        self.superframe.resize(offset, 0);
        self.superframe.extend_from_slice(&decoded.bytes);
        self.block_counter += 1;

        if self.block_counter < usize::from(header.blocks_to_follow) {
            return Ok(None);
        }

        // All blocks in: strip per-block prefixes, verify CRC-32.
        let pdu_start = table.pdu_start;
        let mut payload = Vec::with_capacity(self.block_counter * (self.block_len - pdu_start));
        for b in 0..self.block_counter {
            let start = b * self.block_len + pdu_start;
            payload.extend_from_slice(&self.superframe[start..(b + 1) * self.block_len]);
        }

        let crypto = self.crypto.take();
        let ok = verify_pdu_crc32(&payload);
        self.reset();
        if !ok {
            return Err(FrameError::CrcMismatch {
                kind: crate::errors::CrcKind::Crc32,
                extracted: 0,
                computed: 0,
            });
        }
        Ok(Some(AssembledPdu::Data {
            header,
            payload,
            crypto,
        }))
    }

    fn on_udt_block(
        &mut self,
        decoded: &DecodedBurst,
        header: &DataHeader,
    ) -> Result<Option<AssembledPdu>, FrameError> {
        self.udt_payload.extend_from_slice(&decoded.bytes);
        self.block_counter += 1;

        let reserved_uab = header.udt_format == 0x05 && header.udt_uab == 0x3;
        let done = if reserved_uab {
            // Reserved appended-block count: hunt for the CRC-16 match on
            // the assembled span instead of trusting the header.
            udt_crc_matches(&self.udt_payload) || self.block_counter >= 4
        } else {
            self.block_counter >= usize::from(header.udt_uab.max(1))
        };
        if !done {
            return Ok(None);
        }

        let payload = std::mem::take(&mut self.udt_payload);
        let header = header.clone();
        let matched = udt_crc_matches(&payload);
        self.reset();
        if !matched {
            return Err(FrameError::CrcMismatch {
                kind: crate::errors::CrcKind::Crc16,
                extracted: 0,
                computed: 0,
            });
        }
        Ok(Some(AssembledPdu::Udt { header, payload }))
    }

    /// MBC header: stash and wait for continuations.
    pub fn on_mbc_header(&mut self, decoded: &DecodedBurst) -> Result<(), FrameError> {
        if !decoded.crc_ok {
            return Err(FrameError::CrcMismatch {
                kind: crate::errors::CrcKind::Crc16,
                extracted: 0,
                computed: 0,
            });
        }
        self.mbc_header = Some(decoded.bytes.clone());
        self.mbc_blocks.clear();
        Ok(())
    }

    /// MBC continuation; the last-block flag closes the PDU and the
    /// CRC-16 spans all continuation blocks.
    pub fn on_mbc_continuation(
        &mut self,
        decoded: &DecodedBurst,
    ) -> Result<Option<AssembledPdu>, FrameError> {
        let header = match &self.mbc_header {
            Some(h) => h.clone(),
            None => return Ok(None),
        };
        let last = decoded.bytes[0] & 0x80 != 0;
        self.mbc_blocks.extend_from_slice(&decoded.bytes);
        if self.mbc_blocks.len() > 4 * 12 {
            self.mbc_header = None;
            self.mbc_blocks.clear();
            return Err(FrameError::SuperframeOverflow {
                block: 5,
                capacity: 4 * 12,
            });
        }
        if !last {
            return Ok(None);
        }

        let blocks = std::mem::take(&mut self.mbc_blocks);
        self.mbc_header = None;
        let span = blocks.len() - 2;
        let extracted = u32::from(blocks[span]) << 8 | u32::from(blocks[span + 1]);
        let computed = u32::from(crc16(&bytes_to_bits(&blocks[..span])));
        if extracted != computed {
            return Err(FrameError::CrcMismatch {
                kind: crate::errors::CrcKind::Crc16,
                extracted,
                computed,
            });
        }
        Ok(Some(AssembledPdu::Mbc {
            header,
            continuation: blocks,
        }))
    }
}

/// CRC-32 over the byte-swapped payload ordering: each 16-bit word swaps
/// its two octets before the MSB-first CRC runs. The final four payload
/// octets carry the CRC, themselves word-swapped.
pub fn verify_pdu_crc32(payload: &[u8]) -> bool {
    if payload.len() < 4 {
        return false;
    }
    let span = payload.len() - 4;
    let computed = crc32(&bytes_to_bits(&swap_words(&payload[..span])));
    let tail = &payload[span..];
    let extracted = u32::from_be_bytes([tail[1], tail[0], tail[3], tail[2]]);
    computed == extracted
}

/// Append a CRC-32 in the on-air ordering; the encode-side counterpart of
/// [`verify_pdu_crc32`], used by loopback tests.
pub fn append_pdu_crc32(data: &mut Vec<u8>) {
    let c = crc32(&bytes_to_bits(&swap_words(data)));
    let be = c.to_be_bytes();
    data.extend_from_slice(&[be[1], be[0], be[3], be[2]]);
}

fn swap_words(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        out.push(pair[1]);
        out.push(pair[0]);
    }
    out.extend_from_slice(chunks.remainder());
    out
}

fn udt_crc_matches(payload: &[u8]) -> bool {
    if payload.len() < 2 {
        return false;
    }
    let span = payload.len() - 2;
    let extracted = u32::from(payload[span]) << 8 | u32::from(payload[span + 1]);
    u32::from(crc16(&bytes_to_bits(&payload[..span]))) == extracted
}
