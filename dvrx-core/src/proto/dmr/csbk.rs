//! Control signalling block (CSBK) decoding.

use log::debug;

use crate::event::{Event, EventRecord, EventSink};

/// CSBK opcodes recognized for structured summaries; anything else still
/// surfaces as a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsbkOpcode {
    UnitToUnitVoiceRequest,
    UnitToUnitVoiceAnswer,
    NegativeAck,
    BsOutboundActivation,
    Preamble,
    Other(u8),
}

impl CsbkOpcode {
    pub fn from_bits(op: u8) -> Self {
        match op {
            0x04 => CsbkOpcode::UnitToUnitVoiceRequest,
            0x05 => CsbkOpcode::UnitToUnitVoiceAnswer,
            0x26 => CsbkOpcode::NegativeAck,
            0x38 => CsbkOpcode::BsOutboundActivation,
            0x3D => CsbkOpcode::Preamble,
            other => CsbkOpcode::Other(other),
        }
    }
}

/// Parsed CSBK fields shared by all opcodes.
#[derive(Debug, Clone)]
pub struct Csbk {
    pub last_block: bool,
    pub protect: bool,
    pub opcode: u8,
    pub fid: u8,
    pub dst: u32,
    pub src: u32,
}

impl Csbk {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        Some(Self {
            last_block: bytes[0] & 0x80 != 0,
            protect: bytes[0] & 0x40 != 0,
            opcode: bytes[0] & 0x3F,
            fid: bytes[1],
            dst: u32::from(bytes[4]) << 16 | u32::from(bytes[5]) << 8 | u32::from(bytes[6]),
            src: u32::from(bytes[7]) << 16 | u32::from(bytes[8]) << 8 | u32::from(bytes[9]),
        })
    }
}

fn summarize(csbk: &Csbk, bytes: &[u8]) -> String {
    match CsbkOpcode::from_bits(csbk.opcode) {
        CsbkOpcode::Preamble => {
            let data_follows = bytes[2] & 0x80 != 0;
            let blocks = bytes[3];
            format!(
                "preamble {} to follow: {} blocks, dst {} src {}",
                if data_follows { "data" } else { "csbk" },
                blocks,
                csbk.dst,
                csbk.src
            )
        }
        CsbkOpcode::UnitToUnitVoiceRequest => {
            format!("uu voice request dst {} src {}", csbk.dst, csbk.src)
        }
        CsbkOpcode::UnitToUnitVoiceAnswer => {
            let accepted = bytes[2] & 0x01 != 0;
            format!(
                "uu voice answer ({}) dst {} src {}",
                if accepted { "accept" } else { "refuse" },
                csbk.dst,
                csbk.src
            )
        }
        CsbkOpcode::NegativeAck => format!("nack dst {} src {}", csbk.dst, csbk.src),
        CsbkOpcode::BsOutboundActivation => {
            format!("bs outbound activation src {}", csbk.src)
        }
        CsbkOpcode::Other(op) => format!("opcode {:#04x}", op),
    }
}

/// Decode one single-block CSBK (CRC already verified by the framer).
pub fn handle_csbk(bytes: &[u8], sink: &mut dyn EventSink, slot: u8) {
    let csbk = match Csbk::parse(bytes) {
        Some(c) => c,
        None => return,
    };
    if csbk.protect {
        debug!("protected csbk opcode {:#04x}, not decoded", csbk.opcode);
        return;
    }
    let summary = summarize(&csbk, bytes);
    sink.emit(EventRecord::new(
        "dmr",
        Some(slot),
        Event::Csbk {
            opcode: csbk.opcode,
            fid: csbk.fid,
            summary,
        },
    ));
}

/// Decode an assembled multi-block control PDU: the header carries the
/// opcode, continuations carry the extended arguments.
pub fn handle_mbc(header: &[u8], continuation: &[u8], sink: &mut dyn EventSink, slot: u8) {
    let csbk = match Csbk::parse(header) {
        Some(c) => c,
        None => return,
    };
    let summary = format!(
        "{} (+{} continuation octets)",
        summarize(&csbk, header),
        continuation.len()
    );
    sink.emit(EventRecord::new(
        "dmr",
        Some(slot),
        Event::Csbk {
            opcode: csbk.opcode,
            fid: csbk.fid,
            summary,
        },
    ));
}
