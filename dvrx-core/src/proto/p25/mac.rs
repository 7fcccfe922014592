//! MAC VPDU walker and grant admission.
//!
//! A MAC PDU opens with its classification octet (SIGNAL/PTT/END_PTT/
//! IDLE/ACTIVE/HANGTIME) followed by chained messages. Message length
//! comes from the (mfid, opcode) table; on a miss the MCO field supplies
//! it; failing that the remaining FACCH/SACCH capacity does. Unknown
//! opcodes raise one deduplicated diagnostic and stop the chain.

use std::collections::HashSet;

use log::{debug, info};

use crate::config::TrunkConfig;
use crate::context::{CoreContext, GroupMode};
use crate::event::{Event, EventRecord, EventSink, RegroupKind};
use crate::keystore::KeyStore;
use crate::proto::p25::iden::{IdenEntry, SiteId};
use crate::proto::p25::trunking::{TrunkSm, Tuner};

/// Chained-message capacity in octets after the classification octet.
pub const FACCH_CAPACITY: usize = 16;
pub const SACCH_CAPACITY: usize = 19;

/// Service-option bits.
pub const SVC_EMERGENCY: u8 = 0x80;
pub const SVC_ENCRYPTED: u8 = 0x40;

/// Algorithm ids: clear, symmetric-key family, AES family.
pub const ALG_UNENCRYPTED: u8 = 0x80;
pub const ALG_NONE: u8 = 0x00;
const ALG_SYMMETRIC: [u8; 3] = [0xAA, 0x81, 0x9F];
const ALG_AES: [u8; 2] = [0x84, 0x89];

/// MAC PDU classification from the first octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacKind {
    Signal,
    Ptt,
    EndPtt,
    Idle,
    Active,
    Hangtime,
    Reserved(u8),
}

impl MacKind {
    pub fn from_octet(b: u8) -> Self {
        match b >> 5 {
            0 => MacKind::Signal,
            1 => MacKind::Ptt,
            2 => MacKind::EndPtt,
            3 => MacKind::Idle,
            4 => MacKind::Active,
            6 => MacKind::Hangtime,
            other => MacKind::Reserved(other),
        }
    }
}

/// Does the key store satisfy this algorithm?
pub fn key_available(keys: &KeyStore, alg: u8, keyid: u16) -> bool {
    if alg == ALG_NONE || alg == ALG_UNENCRYPTED {
        return true;
    }
    if ALG_SYMMETRIC.contains(&alg) {
        return keys.has_symmetric(keyid);
    }
    if ALG_AES.contains(&alg) {
        return keys.aes_loaded(keyid);
    }
    false
}

/// Content-octet counts for the standard opcode set (octets following the
/// opcode octet).
fn standard_len(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x01 => 8,  // GROUP_VOICE_CH_USER (abbreviated)
        0x21 => 13, // GROUP_VOICE_CH_USER (extended)
        0x02 => 9,  // UNIT_TO_UNIT_VCH_USER
        0x22 => 14,
        0x05 => 8, // GROUP_VOICE_GRANT_UPDATE_MULTI (implicit)
        0x25 => 7,
        0x40 => 8, // GROUP_VOICE_GRANT
        0x42 => 8, // GROUP_VOICE_GRANT_UPDATE (implicit)
        0xC3 => 7, // (explicit)
        0x44 => 9, // UNIT_TO_UNIT_GRANT
        0x46 => 8,
        0xC4 => 11,
        0x48 | 0x49 => 6, // TELE_INT_GRANT / UPDATE
        0xC8 | 0xC9 => 8,
        0x54 => 6, // SNDCP_DATA_CH_GRANT
        0x55 | 0xD6 => 5,
        0x6C => 7, // REG_RSP (abbreviated)
        0xEC => 9,
        0x6D => 6, // UNIT_REG_CMD
        0x6F => 6, // DEREG_ACK
        0xEF => 8,
        0x70 => 8, // SYNC_BCST
        0x73 | 0x74 | 0x7D => 9, // IDEN_UP (TDMA abb / VHF-UHF / general)
        0xF3 => 14,              // IDEN_UP_TDMA_EXT with provenance
        0x78 => 8,               // SYSTEM_SERVICE_BCST
        0x79 => 8,               // SCCB (implicit)
        0xE9 => 9,
        0x7A => 8, // RFSS_STATUS (implicit)
        0xFA => 10,
        0x7B => 9, // NETWORK_STATUS (implicit)
        0xFB => 11,
        0x7C => 8, // ADJ_STATUS (implicit)
        0xFC => 10,
        0x31 => 2, // MAC_RELEASE
        _ => return None,
    })
}

fn known_vendor(mfid: u8, opcode: u8) -> bool {
    matches!(
        (mfid, opcode),
        (0x90, 0x81) | (0xA4, 0xA8) | (0x10, 0x91) | (0xD8, 0xB0)
    )
}

#[derive(Debug, Clone, Copy)]
struct GrantCandidate {
    channel: u16,
    target: u32,
    src: u32,
    svc: u8,
    group: bool,
    data: bool,
}

#[derive(Default)]
pub struct MacHandler {
    unknown_seen: HashSet<(u8, u8)>,
    net_identity: Option<(u32, u16)>,
    rfss_identity: Option<(u16, u8, u8)>,
}

impl MacHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk one MAC VPDU. `bit_clock_slot` is the slot of the carrying
    /// burst; SACCH PDUs address the opposite slot.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_vpdu(
        &mut self,
        bytes: &[u8],
        sacch: bool,
        bit_clock_slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        tuner: &mut dyn Tuner,
        keys: &KeyStore,
        cfg: &TrunkConfig,
        sink: &mut dyn EventSink,
    ) {
        if bytes.is_empty() {
            return;
        }
        let slot = if sacch {
            bit_clock_slot ^ 1
        } else {
            bit_clock_slot
        };
        let kind = MacKind::from_octet(bytes[0]);
        let content = &bytes[1..];
        // The capacity cap bounds the chained-message region; PTT content
        // is fixed-layout and uses the full frame.
        let capacity = if sacch { SACCH_CAPACITY } else { FACCH_CAPACITY };
        let msgs = &content[..content.len().min(capacity)];

        match kind {
            MacKind::Ptt => self.on_ptt(content, slot, ctx, sm, keys),
            MacKind::EndPtt => {
                sm.set_audio_gate(slot, false);
                sm.touch();
            }
            MacKind::Signal | MacKind::Idle | MacKind::Hangtime => {
                sm.set_audio_gate(slot, false);
                self.walk_messages(msgs, slot, ctx, sm, tuner, cfg, sink);
            }
            MacKind::Active => {
                let state = &ctx.slots[usize::from(slot & 1)];
                let gate = key_available(keys, state.alg, state.keyid);
                sm.set_audio_gate(slot, gate);
                sm.touch();
                self.walk_messages(msgs, slot, ctx, sm, tuner, cfg, sink);
            }
            MacKind::Reserved(v) => debug!("reserved MAC classification {v}"),
        }
    }

    /// MAC_PTT: {MI[9], alg, keyid, tg, src}; opens the slot gate only
    /// when the algorithm is clear or its key is present.
    fn on_ptt(
        &mut self,
        content: &[u8],
        slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        keys: &KeyStore,
    ) {
        if content.len() < 17 {
            return;
        }
        let state = &mut ctx.slots[usize::from(slot & 1)];
        state.mi = content[..9].to_vec();
        state.alg = content[9];
        state.keyid = u16::from(content[10]) << 8 | u16::from(content[11]);
        state.tg = u32::from(content[12]) << 8 | u32::from(content[13]);
        state.set_src(
            u32::from(content[14]) << 16 | u32::from(content[15]) << 8 | u32::from(content[16]),
        );

        let gate = key_available(keys, state.alg, state.keyid);
        sm.set_audio_gate(slot, gate);
        sm.touch();
        debug!(
            "PTT slot {} tg {} src {} alg {:#04x} gate {}",
            slot,
            state.tg,
            state.src(),
            state.alg,
            gate
        );
    }

    /// Entry point for already-extracted chained messages (the TSBK/MBT
    /// bridge funnels through here).
    #[allow(clippy::too_many_arguments)]
    pub fn handle_messages(
        &mut self,
        msgs: &[u8],
        slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        tuner: &mut dyn Tuner,
        cfg: &TrunkConfig,
        sink: &mut dyn EventSink,
    ) {
        self.walk_messages(msgs, slot, ctx, sm, tuner, cfg, sink);
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_messages(
        &mut self,
        msgs: &[u8],
        slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        tuner: &mut dyn Tuner,
        cfg: &TrunkConfig,
        sink: &mut dyn EventSink,
    ) {
        let mut i = 0usize;
        while i < msgs.len() {
            let opcode = msgs[i];
            if opcode == 0x00 {
                // SIGNAL / null padding ends the chain.
                break;
            }
            let (content_len, mfid) = match standard_len(opcode) {
                Some(len) => (len, 0u8),
                None => {
                    let mfid = match msgs.get(i + 1) {
                        Some(&m) => m,
                        None => break,
                    };
                    // MCO counts the whole message including the opcode.
                    let mco = msgs.get(i + 2).map(|b| usize::from(b & 0x3F));
                    let len = match mco {
                        Some(m) if m >= 2 => m - 1,
                        _ => msgs.len() - i - 1,
                    };
                    (len, mfid)
                }
            };

            if mfid != 0 && !known_vendor(mfid, opcode) {
                if self.unknown_seen.insert((mfid, opcode)) {
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::UnknownOpcode { mfid, opcode },
                    ));
                }
                break;
            }

            let end = (i + 1 + content_len).min(msgs.len());
            let content = &msgs[i + 1..end];
            self.dispatch(opcode, mfid, content, slot, ctx, sm, tuner, cfg, sink);
            i = end;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        opcode: u8,
        mfid: u8,
        c: &[u8],
        slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        tuner: &mut dyn Tuner,
        cfg: &TrunkConfig,
        sink: &mut dyn EventSink,
    ) {
        if mfid != 0 {
            self.dispatch_vendor(opcode, mfid, c, slot, ctx, sink);
            return;
        }
        match opcode {
            // Grants and channel-user announcements share admission.
            0x01 | 0x21 if c.len() >= 8 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: u32::from(ch16(&c[3..5])),
                    src: addr24(&c[5..8]),
                    svc: c[0],
                    group: true,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x02 | 0x22 if c.len() >= 9 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: addr24(&c[3..6]),
                    src: addr24(&c[6..9]),
                    svc: c[0],
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x40 if c.len() >= 8 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: u32::from(ch16(&c[3..5])),
                    src: addr24(&c[5..8]),
                    svc: c[0],
                    group: true,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x42 | 0x05 if c.len() >= 8 => {
                let cands = [
                    GrantCandidate {
                        channel: ch16(&c[0..2]),
                        target: u32::from(ch16(&c[2..4])),
                        src: 0,
                        svc: 0,
                        group: true,
                        data: false,
                    },
                    GrantCandidate {
                        channel: ch16(&c[4..6]),
                        target: u32::from(ch16(&c[6..8])),
                        src: 0,
                        svc: 0,
                        group: true,
                        data: false,
                    },
                ];
                self.admit(&cands, slot, ctx, sm, tuner, cfg, sink);
            }
            0xC3 | 0x25 if c.len() >= 7 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: u32::from(ch16(&c[5..7])),
                    src: 0,
                    svc: c[0],
                    group: true,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x44 if c.len() >= 9 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: addr24(&c[3..6]),
                    src: addr24(&c[6..9]),
                    svc: c[0],
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x46 if c.len() >= 8 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[0..2]),
                    target: addr24(&c[2..5]),
                    src: addr24(&c[5..8]),
                    svc: 0,
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0xC4 if c.len() >= 11 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: addr24(&c[5..8]),
                    src: addr24(&c[8..11]),
                    svc: c[0],
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x48 | 0x49 if c.len() >= 6 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: 0,
                    src: addr24(&c[3..6]),
                    svc: c[0],
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0xC8 | 0xC9 if c.len() >= 8 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: 0,
                    src: addr24(&c[5..8]),
                    svc: c[0],
                    group: false,
                    data: false,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x54 if c.len() >= 6 => {
                let cand = GrantCandidate {
                    channel: ch16(&c[1..3]),
                    target: addr24(&c[3..6]),
                    src: addr24(&c[3..6]),
                    svc: c[0],
                    group: false,
                    data: true,
                };
                self.admit(&[cand], slot, ctx, sm, tuner, cfg, sink);
            }
            0x55 | 0xD6 => debug!("SNDCP page/announcement"),
            0x6C | 0xEC if c.len() >= 4 => {
                let rid = addr24(&c[1..4]);
                let accepted = c[0] & 0x03 == 0;
                if accepted {
                    ctx.affiliations.insert(rid);
                }
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::Registration { rid, accepted },
                ));
            }
            0x6D => debug!("unit registration command"),
            0x6F if c.len() >= 6 => {
                let rid = addr24(&c[3..6]);
                ctx.affiliations.remove(&rid);
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::Deregistration { rid },
                ));
            }
            0xEF if c.len() >= 8 => {
                let rid = addr24(&c[5..8]);
                ctx.affiliations.remove(&rid);
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::Deregistration { rid },
                ));
            }
            0x70 => debug!("sync broadcast"),
            0x78 => debug!("system service broadcast"),
            0x73 | 0x74 | 0x7D if c.len() >= 9 => {
                self.on_iden_up(opcode, c, None, ctx, sink, slot);
            }
            0xF3 if c.len() >= 14 => {
                let site = SiteId {
                    wacn: addr24(&c[9..12]) >> 4,
                    sysid: ch16(&c[12..14]) & 0xFFF,
                    rfss: self.rfss_identity.map(|(_, r, _)| r).unwrap_or(0),
                    site: self.rfss_identity.map(|(_, _, s)| s).unwrap_or(0),
                };
                self.on_iden_up(opcode, c, Some(site), ctx, sink, slot);
            }
            0x79 | 0xE9 if c.len() >= 8 => {
                let mut freqs = Vec::new();
                for ch in [ch16(&c[2..4]), ch16(&c[4..6])] {
                    if let Some(f) = ctx.iden.resolve(ch) {
                        freqs.push(f);
                    }
                }
                if !freqs.is_empty() {
                    sm.on_neighbor_update(&freqs);
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::NeighborUpdate { freqs_hz: freqs },
                    ));
                }
            }
            0x7A | 0xFA if c.len() >= 8 => {
                let sysid = ch16(&c[1..3]) & 0xFFF;
                self.rfss_identity = Some((sysid, c[3], c[4]));
                self.try_set_site(ctx, sink, slot);
            }
            0x7B | 0xFB if c.len() >= 5 => {
                // WACN is 20 bits across octets 1..3 plus the top nibble
                // of octet 3; the 12-bit system id follows.
                let wacn =
                    u32::from(c[1]) << 12 | u32::from(c[2]) << 4 | u32::from(c[3] >> 4);
                let sysid = u16::from(c[3] & 0x0F) << 8 | u16::from(c[4]);
                self.net_identity = Some((wacn, sysid));
                self.try_set_site(ctx, sink, slot);
            }
            0x7C | 0xFC if c.len() >= 8 => {
                let ch = ch16(&c[3..5]);
                if let Some(freq) = ctx.iden.resolve(ch) {
                    sm.on_neighbor_update(&[freq]);
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::NeighborUpdate {
                            freqs_hz: vec![freq],
                        },
                    ));
                }
            }
            0x31 => {
                sm.clear_audio_gates();
                ctx.flush_audio();
                for s in ctx.slots.iter_mut() {
                    s.alg = 0;
                    s.keyid = 0;
                }
                let released = sm.on_release(tuner);
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::Release { forced: true },
                ));
                if released {
                    info!("MAC_RELEASE: returned to control channel");
                }
            }
            other => {
                if self.unknown_seen.insert((0, other)) {
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::UnknownOpcode {
                            mfid: 0,
                            opcode: other,
                        },
                    ));
                }
            }
        }
    }

    fn on_iden_up(
        &mut self,
        opcode: u8,
        c: &[u8],
        explicit_site: Option<SiteId>,
        ctx: &mut CoreContext,
        sink: &mut dyn EventSink,
        slot: u8,
    ) {
        let entry = IdenEntry {
            iden: c[0] >> 4,
            channel_type: c[0] & 0x0F,
            tx_offset: IdenEntry::decode_offset(ch16(&c[1..3]) & 0x3FFF),
            spacing_125hz: u32::from(ch16(&c[3..5])),
            base_freq_5hz: u64::from(u32::from_be_bytes([c[5], c[6], c[7], c[8]])),
            tdma: matches!(opcode, 0x73 | 0xF3),
            source: None,
            trust: crate::proto::p25::iden::Trust::Untrusted,
        };
        let iden = entry.iden;
        let base = entry.base_freq_5hz * 5;
        let spacing = entry.spacing_125hz * 125;
        let tdma = entry.tdma;
        let from = explicit_site.or_else(|| ctx.iden.site());
        ctx.iden.update(entry, from);
        sink.emit(EventRecord::new(
            "p25",
            Some(slot),
            Event::IdenUpdate {
                iden,
                base_freq_hz: base,
                spacing_hz: spacing,
                tdma,
            },
        ));
    }

    fn try_set_site(&mut self, ctx: &mut CoreContext, sink: &mut dyn EventSink, slot: u8) {
        if let (Some((wacn, net_sys)), Some((rfss_sys, rfss, site))) =
            (self.net_identity, self.rfss_identity)
        {
            if net_sys == rfss_sys {
                let id = SiteId {
                    wacn,
                    sysid: net_sys,
                    rfss,
                    site,
                };
                ctx.iden.set_site(id);
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::SiteStatus {
                        wacn,
                        sysid: net_sys,
                        rfss,
                        site,
                    },
                ));
            }
        }
    }

    fn dispatch_vendor(
        &mut self,
        opcode: u8,
        mfid: u8,
        c: &[u8],
        slot: u8,
        ctx: &mut CoreContext,
        sink: &mut dyn EventSink,
    ) {
        // Vendor content: [mfid, mco, payload…].
        let payload = if c.len() > 2 { &c[2..] } else { &[][..] };
        match (mfid, opcode) {
            (0x90, 0x81) if payload.len() >= 7 => {
                let flags = payload[0];
                let sg = u32::from(ch16(&payload[1..3]));
                let delete = flags & 0x80 != 0;
                let kind = if flags & 0x40 != 0 {
                    RegroupKind::SimulSelect
                } else {
                    RegroupKind::Patch
                };
                let active = flags & 0x20 != 0;
                if delete {
                    ctx.patches.remove(&sg);
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::PatchUpdate {
                            sg,
                            kind,
                            active: false,
                            wgids: Vec::new(),
                        },
                    ));
                    return;
                }
                let patch = ctx
                    .patches
                    .entry(sg)
                    .or_insert_with(|| crate::context::PatchGroup::new(kind));
                patch.kind = kind;
                patch.active = active;
                patch.key_id = ch16(&payload[3..5]);
                patch.alg_id = payload[5];
                patch.ssn = payload[6] & 0x1F;
                for pair in payload[7..].chunks_exact(2) {
                    patch.wgids.insert(u32::from(ch16(pair)));
                }
                let wgids: Vec<u32> = patch.wgids.iter().copied().collect();
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::PatchUpdate {
                        sg,
                        kind,
                        active,
                        wgids,
                    },
                ));
            }
            (0xA4, 0xA8) | (0x10, 0x91) if payload.len() >= 4 => {
                let src = addr24(&payload[..3]);
                let fragment: String = payload[3..]
                    .iter()
                    .filter(|&&b| (0x20..0x7F).contains(&b))
                    .map(|&b| char::from(b))
                    .collect();
                let state = &mut ctx.slots[usize::from(slot & 1)];
                state.set_src(src);
                state.append_alias_fragment(&fragment);
                let alias = state.alias().unwrap_or_default().to_string();
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::TalkerAlias { src, alias },
                ));
            }
            (0xD8, 0xB0) if payload.len() >= 2 => {
                sink.emit(EventRecord::new(
                    "p25",
                    Some(slot),
                    Event::MicroslotCounter {
                        value: u32::from(ch16(&payload[..2])),
                    },
                ));
            }
            _ => debug!("vendor message mfid {:#04x} opcode {:#04x} skipped", mfid, opcode),
        }
    }

    /// The grant admission walk shared by every grant-bearing opcode.
    #[allow(clippy::too_many_arguments)]
    fn admit(
        &mut self,
        candidates: &[GrantCandidate],
        slot: u8,
        ctx: &mut CoreContext,
        sm: &mut TrunkSm,
        tuner: &mut dyn Tuner,
        cfg: &TrunkConfig,
        sink: &mut dyn EventSink,
    ) {
        for cand in candidates {
            let freq = match ctx.iden.resolve(cand.channel) {
                Some(f) => f,
                None => continue, // unmappable channel: grant ignored
            };

            let mut mode = ctx.group_mode(cand.target);
            if cand.group && cfg.tg_hold != 0 {
                mode = if cfg.tg_hold == cand.target {
                    GroupMode::Allow
                } else {
                    GroupMode::Block
                };
            }

            if cand.group && !cfg.tune_group_calls {
                break;
            }
            if !cand.group && !cand.data && !cfg.tune_private_calls {
                break;
            }
            if cand.data && !cfg.tune_data_calls {
                break;
            }
            if cand.svc & SVC_ENCRYPTED != 0 && !cfg.tune_enc_calls {
                if ctx.lockout_group(cand.target) {
                    sink.emit(EventRecord::new(
                        "p25",
                        Some(slot),
                        Event::EncryptionLockout {
                            tg: cand.target,
                            alg: 0,
                            keyid: 0,
                        },
                    ));
                }
                break;
            }
            if matches!(mode, GroupMode::Block | GroupMode::DigitalEnc) {
                continue;
            }

            if !sm.tuned() {
                let tuned = if cand.group {
                    sm.on_group_grant(tuner, freq, cand.target, cand.src)
                } else {
                    sm.on_indiv_grant(tuner, freq, cand.target, cand.src)
                };
                if tuned {
                    let event = if cand.group {
                        Event::GroupGrant {
                            tg: cand.target,
                            src: cand.src,
                            channel: cand.channel,
                            freq_hz: freq,
                        }
                    } else {
                        Event::IndivGrant {
                            dst: cand.target,
                            src: cand.src,
                            channel: cand.channel,
                            freq_hz: freq,
                        }
                    };
                    sink.emit(EventRecord::new("p25", Some(slot), event));
                }
            } else {
                ctx.vc_freq_display = freq;
            }
            break;
        }
    }
}

fn ch16(b: &[u8]) -> u16 {
    u16::from(b[0]) << 8 | u16::from(b[1])
}

fn addr24(b: &[u8]) -> u32 {
    u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::VecSink;
    use crate::proto::p25::iden::Trust;
    use crate::proto::p25::trunking::test_support::FakeTuner;
    use std::time::Duration;

    struct Rig {
        handler: MacHandler,
        ctx: CoreContext,
        sm: TrunkSm,
        tuner: FakeTuner,
        keys: KeyStore,
        cfg: TrunkConfig,
        sink: VecSink,
    }

    impl Rig {
        fn new() -> Self {
            let mut sm = TrunkSm::new(Duration::from_secs(1));
            sm.set_cc_freq(853_000_000);
            Self {
                handler: MacHandler::new(),
                ctx: CoreContext::new(),
                sm,
                tuner: FakeTuner::default(),
                keys: KeyStore::new(),
                cfg: TrunkConfig::default(),
                sink: VecSink::default(),
            }
        }

        fn feed(&mut self, bytes: &[u8], sacch: bool, slot: u8) {
            self.handler.handle_vpdu(
                bytes,
                sacch,
                slot,
                &mut self.ctx,
                &mut self.sm,
                &mut self.tuner,
                &self.keys,
                &self.cfg,
                &mut self.sink,
            );
        }

        fn trust_iden_1(&mut self) {
            self.ctx.iden.hard_set(IdenEntry {
                iden: 1,
                base_freq_5hz: 851_000_000 / 5,
                spacing_125hz: 100,
                tx_offset: -180,
                tdma: true,
                channel_type: 3,
                source: None,
                trust: Trust::Untrusted,
            });
        }
    }

    /// SIGNAL-classified PDU carrying one chained message.
    fn signal_pdu(msg: &[u8]) -> Vec<u8> {
        let mut pdu = vec![0x00 << 5];
        pdu.extend_from_slice(msg);
        pdu
    }

    fn group_ch_user(ch: u16, tg: u16, src: u32, svc: u8) -> Vec<u8> {
        let mut m = vec![0x01, svc];
        m.extend_from_slice(&ch.to_be_bytes());
        m.extend_from_slice(&tg.to_be_bytes());
        m.extend_from_slice(&src.to_be_bytes()[1..]);
        m
    }

    #[test]
    fn iden_up_then_grant_tunes_the_voice_channel() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        rig.feed(&signal_pdu(&group_ch_user(0x1042, 100, 9001, 0)), false, 0);

        assert!(rig.sm.tuned());
        assert_eq!(rig.sm.active_tg(), 100);
        assert_eq!(rig.tuner.tuned_to, vec![851_825_000]);
        assert!(rig
            .sink
            .records
            .iter()
            .any(|r| matches!(r.event, Event::GroupGrant { tg: 100, freq_hz: 851_825_000, .. })));
    }

    #[test]
    fn unmappable_channel_is_ignored() {
        let mut rig = Rig::new();
        rig.feed(&signal_pdu(&group_ch_user(0x1042, 100, 9001, 0)), false, 0);
        assert!(!rig.sm.tuned());
        assert!(rig.tuner.tuned_to.is_empty());
    }

    #[test]
    fn encrypted_grant_locks_out_once() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        let grant = signal_pdu(&group_ch_user(0x1042, 500, 9001, SVC_ENCRYPTED));
        rig.feed(&grant, false, 0);
        rig.feed(&grant, false, 0);

        assert!(!rig.sm.tuned());
        assert_eq!(rig.ctx.group_mode(500), GroupMode::DigitalEnc);
        let lockouts = rig
            .sink
            .records
            .iter()
            .filter(|r| matches!(r.event, Event::EncryptionLockout { tg: 500, .. }))
            .count();
        assert_eq!(lockouts, 1);
    }

    #[test]
    fn tg_hold_blocks_other_groups() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        rig.cfg.tg_hold = 777;
        rig.feed(&signal_pdu(&group_ch_user(0x1042, 100, 9001, 0)), false, 0);
        assert!(!rig.sm.tuned());

        rig.feed(&signal_pdu(&group_ch_user(0x1042, 777, 9001, 0)), false, 0);
        assert!(rig.sm.tuned());
        assert_eq!(rig.sm.active_tg(), 777);
    }

    #[test]
    fn mac_release_returns_to_cc_and_clears_gates() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        rig.feed(&signal_pdu(&group_ch_user(0x1042, 100, 9001, 0)), false, 0);
        rig.sm.set_audio_gate(0, true);
        rig.sm.set_audio_gate(1, true);

        rig.feed(&signal_pdu(&[0x31, 0x80, 0x00]), false, 0);
        assert!(!rig.sm.tuned());
        assert!(!rig.sm.audio_allowed(0) && !rig.sm.audio_allowed(1));
        assert_eq!(rig.tuner.tuned_to.last(), Some(&853_000_000));
    }

    #[test]
    fn ptt_gates_by_key_availability() {
        let mut rig = Rig::new();
        // MAC_PTT: MI[9], alg=0xAA, keyid=0x0005, tg, src.
        let mut ptt = vec![1 << 5];
        ptt.extend_from_slice(&[0u8; 9]);
        ptt.push(0xAA);
        ptt.extend_from_slice(&[0x00, 0x05]);
        ptt.extend_from_slice(&[0x00, 0x64]);
        ptt.extend_from_slice(&[0x00, 0x23, 0x29]);

        rig.feed(&ptt, false, 0);
        assert!(!rig.sm.audio_allowed(0), "gate must stay shut without key");

        rig.keys.load_symmetric(0x0005, vec![1, 2, 3, 4, 5]);
        rig.feed(&ptt, false, 0);
        assert!(rig.sm.audio_allowed(0));
    }

    #[test]
    fn sacch_addresses_the_opposite_slot() {
        let mut rig = Rig::new();
        let mut ptt = vec![1 << 5];
        ptt.extend_from_slice(&[0u8; 9]);
        ptt.push(ALG_UNENCRYPTED);
        ptt.extend_from_slice(&[0x00, 0x00]);
        ptt.extend_from_slice(&[0x00, 0x64]);
        ptt.extend_from_slice(&[0x00, 0x23, 0x29]);

        rig.feed(&ptt, true, 0);
        assert!(rig.sm.audio_allowed(1));
        assert!(!rig.sm.audio_allowed(0));
    }

    #[test]
    fn unknown_opcode_diagnoses_once_and_stops_chain() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        // Unknown vendor opcode, then a grant that must never be parsed.
        let mut msg = vec![0x9D, 0x77, 0x04, 0xFF];
        msg.extend_from_slice(&group_ch_user(0x1042, 100, 9001, 0));
        rig.feed(&signal_pdu(&msg), false, 0);
        rig.feed(&signal_pdu(&msg), false, 0);

        assert!(!rig.sm.tuned());
        let diags = rig
            .sink
            .records
            .iter()
            .filter(|r| matches!(r.event, Event::UnknownOpcode { mfid: 0x77, opcode: 0x9D }))
            .count();
        assert_eq!(diags, 1);
    }

    #[test]
    fn rfss_and_network_status_set_site_identity() {
        let mut rig = Rig::new();
        // RFSS_STATUS: lra, sysid, rfss, site, ch, flags.
        rig.feed(
            &signal_pdu(&[0x7A, 0x00, 0x01, 0x23, 0x01, 0x01, 0x10, 0x42, 0x00]),
            false,
            0,
        );
        // NETWORK_STATUS: lra, wacn 0xBEE00 / sysid 0x123 packed across
        // octets 2..5, then the channel and service flags.
        rig.feed(
            &signal_pdu(&[0x7B, 0x00, 0xBE, 0xE0, 0x01, 0x23, 0x10, 0x42, 0x00, 0x00]),
            false,
            0,
        );
        let site = rig.ctx.iden.site().expect("site identity set");
        assert_eq!(site.sysid, 0x123);
        assert_eq!(site.wacn, 0xBEE00);
        assert_eq!(site.rfss, 1);
        assert_eq!(site.site, 1);
    }

    #[test]
    fn adjacent_status_feeds_candidates() {
        let mut rig = Rig::new();
        rig.trust_iden_1();
        // ADJ_STATUS: lra, rfss, site, ch2, flags, sysid2.
        rig.feed(
            &signal_pdu(&[0x7C, 0x00, 0x01, 0x02, 0x10, 0x42, 0x00, 0x01, 0x23]),
            false,
            0,
        );
        assert_eq!(rig.sm.candidates(), &[851_825_000]);
    }

    #[test]
    fn regroup_builds_patch_table() {
        let mut rig = Rig::new();
        // Vendor: opcode 0x81, MFID 0x90, MCO, flags(active), sg=0x0200,
        // key, alg, ssn, wgids 100 and 200.
        let msg = [
            0x81, 0x90, 0x0E, 0x20, 0x02, 0x00, 0x00, 0x01, 0x80, 0x05, 0x00, 0x64, 0x00, 0xC8,
        ];
        rig.feed(&signal_pdu(&msg), false, 0);
        let patch = rig.ctx.patches.get(&0x0200).expect("patch created");
        assert!(patch.active);
        assert_eq!(patch.kind, RegroupKind::Patch);
        assert!(patch.wgids.contains(&100) && patch.wgids.contains(&200));
    }

    #[test]
    fn talker_alias_accumulates_and_clears_on_src_change() {
        let mut rig = Rig::new();
        let alias_msg = |src: u32, text: &[u8]| {
            let mut m = vec![0xA8, 0xA4, (3 + 3 + text.len()) as u8];
            m.extend_from_slice(&src.to_be_bytes()[1..]);
            m.extend_from_slice(text);
            m
        };
        rig.feed(&signal_pdu(&alias_msg(9001, b"ENG ")), false, 0);
        rig.feed(&signal_pdu(&alias_msg(9001, b"51")), false, 0);
        assert_eq!(rig.ctx.slots[0].alias(), Some("ENG 51"));

        rig.feed(&signal_pdu(&alias_msg(9002, b"MED 7")), false, 0);
        assert_eq!(rig.ctx.slots[0].alias(), Some("MED 7"));
    }
}
