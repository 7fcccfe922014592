//! Phase 1 trunking-signalling-block bridge.
//!
//! A TSBK carries the same control vocabulary as the Phase 2 MAC
//! messages in a 12-octet single-block envelope: last-block flag and
//! opcode, manufacturer id, eight argument octets, CRC-16. Rather than
//! duplicating every handler, the bridge rewrites the block into the
//! equivalent MAC message and funnels it through the MAC dispatcher. MBT
//! (multi-block) payloads carry the same opcode space with a longer
//! argument field and ride the same translation.

use log::debug;

use crate::config::TrunkConfig;
use crate::context::CoreContext;
use crate::errors::{CrcKind, DvrxError, FrameError};
use crate::event::EventSink;
use crate::fec::crc::{bytes_to_bits, crc16};
use crate::frame::burst::decode_p25_half_rate;
use crate::proto::p25::mac::MacHandler;
use crate::proto::p25::trunking::{TrunkSm, Tuner};

/// TSBK opcode → equivalent MAC message opcode.
fn translate_opcode(tsbk: u8) -> Option<u8> {
    Some(match tsbk {
        0x00 => 0x40, // group voice channel grant
        0x02 => 0x42, // group voice grant update
        0x04 => 0x44, // unit-to-unit grant
        0x06 => 0x46, // unit-to-unit grant update
        0x08 => 0x48, // telephone interconnect grant
        0x09 => 0x49,
        0x14 => 0x54, // SNDCP data channel grant
        0x28 => 0x6C, // group affiliation / registration response
        0x2F => 0x6F, // de-registration ack
        0x33 => 0x73, // iden update (TDMA)
        0x34 => 0x74, // iden update (VHF/UHF)
        0x3D => 0x7D, // iden update (general)
        0x39 => 0x79, // secondary control channel broadcast
        0x3A => 0x7A, // RFSS status
        0x3B => 0x7B, // network status
        0x3C => 0x7C, // adjacent site status
        _ => return None,
    })
}

/// Decode a TSBK from its 98 deinterleaved dibits: half-rate trellis,
/// then the CRC-16 over the first ten octets.
pub fn decode_tsbk_dibits(
    dibits: &[u8; 98],
    rel: &[u8; 98],
    erasure: u8,
) -> Result<[u8; 12], DvrxError> {
    let bytes = decode_p25_half_rate(dibits, rel, erasure)?;
    let bits = bytes_to_bits(&bytes[..10]);
    let computed = crc16(&bits);
    let extracted = u16::from(bytes[10]) << 8 | u16::from(bytes[11]);
    if computed != extracted {
        return Err(FrameError::CrcMismatch {
            kind: CrcKind::Crc16,
            extracted: u32::from(extracted),
            computed: u32::from(computed),
        }
        .into());
    }
    Ok(bytes)
}

/// Route one CRC-verified TSBK through the MAC dispatcher.
#[allow(clippy::too_many_arguments)]
pub fn handle_tsbk(
    bytes: &[u8; 12],
    handler: &mut MacHandler,
    ctx: &mut CoreContext,
    sm: &mut TrunkSm,
    tuner: &mut dyn Tuner,
    cfg: &TrunkConfig,
    sink: &mut dyn EventSink,
) {
    let opcode = bytes[0] & 0x3F;
    let mfid = bytes[1];
    if mfid != 0 {
        debug!("vendor TSBK mfid {:#04x} opcode {:#04x} skipped", mfid, opcode);
        return;
    }
    let Some(mac_opcode) = translate_opcode(opcode) else {
        debug!("TSBK opcode {:#04x} has no MAC equivalent", opcode);
        return;
    };
    let mut msg = Vec::with_capacity(9);
    msg.push(mac_opcode);
    msg.extend_from_slice(&bytes[2..10]);
    handler.handle_messages(&msg, 0, ctx, sm, tuner, cfg, sink);
}

/// Assembled MBT: header octets carry the opcode, continuation octets the
/// arguments; same translation as the single block form.
#[allow(clippy::too_many_arguments)]
pub fn handle_mbt(
    header: &[u8],
    continuation: &[u8],
    handler: &mut MacHandler,
    ctx: &mut CoreContext,
    sm: &mut TrunkSm,
    tuner: &mut dyn Tuner,
    cfg: &TrunkConfig,
    sink: &mut dyn EventSink,
) {
    if header.len() < 8 {
        return;
    }
    let opcode = header[7] & 0x3F;
    let Some(mac_opcode) = translate_opcode(opcode) else {
        debug!("MBT opcode {:#04x} has no MAC equivalent", opcode);
        return;
    };
    let mut msg = Vec::with_capacity(1 + continuation.len());
    msg.push(mac_opcode);
    msg.extend_from_slice(continuation);
    handler.handle_messages(&msg, 0, ctx, sm, tuner, cfg, sink);
}
