//! End-to-end receive pipeline: IQ in, events out.
//!
//! Owns the CQPSK front-end, the slicer/framer pair, the per-slot data
//! assemblers, the MAC handler and the trunking state machine, and wires
//! them in the §overview order. One instance per receiver; everything is
//! single-threaded inside.

use num_complex::Complex64;

use crate::config::{soft_erasure_threshold, DemodConfig, LcchCrcSpan, TrunkConfig};
use crate::context::CoreContext;
use crate::dsp::cqpsk::CqpskFrontEnd;
use crate::event::{Event, EventRecord, EventSink, RejectKind};
use crate::fec::crc::{bits_to_u32, crc12, crc16};
use crate::frame::assembler::SlotAssembler;
use crate::frame::burst::{decode_burst, BurstType};
use crate::frame::framer::{Framer, FramerEvent, RawFrame};
use crate::frame::slicer;
use crate::keystore::KeyStore;
use crate::proto::dmr;
use crate::proto::p25::mac::MacHandler;
use crate::proto::p25::trunking::{TrunkSm, Tuner};

/// Which Phase 2 logical channel carried a MAC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacChannel {
    /// 156-bit fast associated channel, CRC-12 over 144 bits.
    Facch,
    /// 180-bit slow associated channel, CRC-12 over 168 bits.
    Sacch,
    /// LCCH, CRC-16 span per configuration.
    Lcch,
}

pub struct Pipeline {
    front_end: CqpskFrontEnd,
    framer: Framer,
    assemblers: [SlotAssembler; 2],
    mac: MacHandler,
    pub ctx: CoreContext,
    pub sm: TrunkSm,
    keys: KeyStore,
    cfg: TrunkConfig,
    erasure: u8,
    symbols: Vec<Complex64>,
}

impl Pipeline {
    pub fn new(demod: DemodConfig, cfg: TrunkConfig, keys: KeyStore) -> Self {
        let sm = TrunkSm::new(cfg.hang_time);
        Self {
            front_end: CqpskFrontEnd::new(demod),
            framer: Framer::new(),
            assemblers: [SlotAssembler::new(), SlotAssembler::new()],
            mac: MacHandler::new(),
            ctx: CoreContext::new(),
            sm,
            keys,
            cfg,
            erasure: soft_erasure_threshold(),
            symbols: Vec::with_capacity(256),
        }
    }

    pub fn keys_mut(&mut self) -> &mut KeyStore {
        &mut self.keys
    }

    pub fn config(&self) -> &TrunkConfig {
        &self.cfg
    }

    /// Feed one block of baseband IQ.
    pub fn process_iq(
        &mut self,
        iq: &[Complex64],
        tuner: &mut dyn Tuner,
        sink: &mut dyn EventSink,
    ) {
        self.symbols.clear();
        self.front_end.process(iq, &mut self.symbols);
        let symbols = std::mem::take(&mut self.symbols);
        for &sym in &symbols {
            let d = slicer::slice(sym);
            if let Some(ev) = self.framer.feed(d) {
                self.on_frame(ev, tuner, sink);
            }
        }
        self.symbols = symbols;
    }

    /// Samples-per-symbol change when hopping CC ↔ VC.
    pub fn retune(&mut self, sps: f64) {
        self.front_end.retune(sps);
    }

    pub fn front_end(&self) -> &CqpskFrontEnd {
        &self.front_end
    }

    /// Periodic driver for the hang timer.
    pub fn tick(&mut self, tuner: &mut dyn Tuner) {
        self.sm.tick(tuner);
    }

    fn reject(sink: &mut dyn EventSink, slot: u8, kind: RejectKind, summary: String) {
        sink.emit(EventRecord::new(
            "dmr",
            Some(slot),
            Event::FrameRejected { kind, summary },
        ));
    }

    fn on_frame(&mut self, ev: FramerEvent, tuner: &mut dyn Tuner, sink: &mut dyn EventSink) {
        match ev {
            FramerEvent::DmrData(frame) => self.on_dmr_data(frame, sink),
            FramerEvent::DmrVoice { slot, .. } => {
                // Voice bursts keep the call alive; MBE synthesis itself
                // is an external collaborator.
                let _ = slot;
                self.sm.touch();
            }
            FramerEvent::P25Sync(_) => {
                let _ = tuner;
            }
            FramerEvent::SlotTypeUnreadable { slot } => {
                Self::reject(
                    sink,
                    slot,
                    RejectKind::FecIrrecoverable,
                    "slot type beyond Golay radius".into(),
                );
            }
        }
    }

    fn on_dmr_data(&mut self, frame: RawFrame, sink: &mut dyn EventSink) {
        let Some(mut burst) = BurstType::from_data_type(frame.data_type) else {
            Self::reject(
                sink,
                frame.slot,
                RejectKind::FecIrrecoverable,
                format!("undefined data type {:#x}", frame.data_type),
            );
            return;
        };
        if burst == BurstType::Idle {
            return;
        }
        let asm = &mut self.assemblers[usize::from(frame.slot & 1)];
        if burst.is_data_block() && asm.confirmed() {
            burst = burst.confirmed();
        }

        let decoded = match decode_burst(burst, &frame.info_bits, &frame.reliabilities, self.erasure)
        {
            Ok(d) => d,
            Err(err) => {
                Self::reject(sink, frame.slot, RejectKind::FecIrrecoverable, err.to_string());
                return;
            }
        };

        match burst {
            BurstType::Csbk => {
                if !decoded.crc_ok {
                    Self::reject(sink, frame.slot, RejectKind::Crc, "CSBK CRC".into());
                    return;
                }
                dmr::csbk::handle_csbk(&decoded.bytes, sink, frame.slot);
            }
            BurstType::DataHeader => {
                if let Some(params) = dmr::data::parse_proprietary_header(&decoded.bytes) {
                    asm.on_proprietary_header(params);
                    return;
                }
                if let Err(err) = asm.on_data_header(&decoded, &self.cfg) {
                    Self::reject(sink, frame.slot, RejectKind::Crc, err.to_string());
                }
            }
            BurstType::MbcHeader => {
                if let Err(err) = asm.on_mbc_header(&decoded) {
                    Self::reject(sink, frame.slot, RejectKind::Crc, err.to_string());
                }
            }
            BurstType::MbcContinuation => match asm.on_mbc_continuation(&decoded) {
                Ok(Some(pdu)) => {
                    dmr::data::dispatch_pdu(pdu, &self.keys, sink, frame.slot);
                }
                Ok(None) => {}
                Err(err) => Self::reject(sink, frame.slot, RejectKind::Crc, err.to_string()),
            },
            BurstType::Pi => {
                if decoded.crc_ok {
                    // PI header: alg, keyid, MI for the following voice.
                    let state = &mut self.ctx.slots[usize::from(frame.slot & 1)];
                    state.alg = decoded.bytes[0];
                    state.keyid = u16::from(decoded.bytes[2]) << 8 | u16::from(decoded.bytes[3]);
                    state.mi = decoded.bytes[4..8].to_vec();
                }
            }
            BurstType::Vlc | BurstType::Tlc => {
                if decoded.crc_ok {
                    let state = &mut self.ctx.slots[usize::from(frame.slot & 1)];
                    state.tg = u32::from(decoded.bytes[3]) << 16
                        | u32::from(decoded.bytes[4]) << 8
                        | u32::from(decoded.bytes[5]);
                    state.set_src(
                        u32::from(decoded.bytes[6]) << 16
                            | u32::from(decoded.bytes[7]) << 8
                            | u32::from(decoded.bytes[8]),
                    );
                }
            }
            BurstType::Usbd => {
                if decoded.crc_ok {
                    sink.emit(EventRecord::new(
                        "dmr",
                        Some(frame.slot),
                        Event::DataPdu {
                            sap: 0,
                            src: 0,
                            dst: 0,
                            octets: decoded.bytes.len(),
                            summary: "usbd".into(),
                        },
                    ));
                }
            }
            b if b.is_data_block() => {
                match asm.on_data_block(&decoded, &self.cfg) {
                    Ok(Some(pdu)) => {
                        dmr::data::dispatch_pdu(pdu, &self.keys, sink, frame.slot);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let kind = match &err {
                            crate::errors::FrameError::OutOfSequence { .. } => {
                                RejectKind::OutOfSequence
                            }
                            _ => RejectKind::Crc,
                        };
                        Self::reject(sink, frame.slot, kind, err.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    /// Drive the P25 Phase 2 MAC path with a recovered logical-channel
    /// frame (bits after the half-rate trellis).
    pub fn handle_mac_frame(
        &mut self,
        bits: &[u8],
        channel: MacChannel,
        bit_clock_slot: u8,
        tuner: &mut dyn Tuner,
        sink: &mut dyn EventSink,
    ) {
        let (span, check16) = match channel {
            MacChannel::Facch => (144usize, false),
            MacChannel::Sacch => (168, false),
            MacChannel::Lcch => match self.cfg.lcch_crc_span {
                LcchCrcSpan::Fixed164 => (164, true),
                LcchCrcSpan::McoDerived => {
                    let mco = if bits.len() >= 16 {
                        bits_to_u32(&bits[10..16]) as usize
                    } else {
                        0
                    };
                    ((16 + 8 * mco).min(bits.len().saturating_sub(16)), true)
                }
            },
        };
        let crc_len = if check16 { 16 } else { 12 };
        if bits.len() < span + crc_len {
            return;
        }
        let extracted = bits_to_u32(&bits[span..span + crc_len]);
        let computed = if check16 {
            u32::from(crc16(&bits[..span]))
        } else {
            u32::from(crc12(&bits[..span]))
        };
        if extracted != computed {
            sink.emit(EventRecord::new(
                "p25",
                Some(bit_clock_slot),
                Event::FrameRejected {
                    kind: RejectKind::Crc,
                    summary: format!("{:?} CRC mismatch", channel),
                },
            ));
            return;
        }

        let bytes = crate::fec::crc::bits_to_bytes(&bits[..span]);
        self.mac.handle_vpdu(
            &bytes,
            matches!(channel, MacChannel::Sacch),
            bit_clock_slot,
            &mut self.ctx,
            &mut self.sm,
            tuner,
            &self.keys,
            &self.cfg,
            sink,
        );
    }

    /// Forced release entry point (user action or watchdog).
    pub fn force_release(&mut self, tuner: &mut dyn Tuner, sink: &mut dyn EventSink) {
        self.sm.clear_audio_gates();
        self.ctx.flush_audio();
        for asm in &mut self.assemblers {
            asm.reset();
        }
        if self.sm.on_release(tuner) {
            sink.emit(EventRecord::new(
                "p25",
                None,
                Event::Release { forced: true },
            ));
        }
    }
}
