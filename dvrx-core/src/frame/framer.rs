//! Sync hunting and burst reassembly.
//!
//! The framer eats sliced dibits, hunts the sync vocabulary, and when a
//! data sync lands it stitches the surrounding payload halves back into
//! one info frame: 98 info bits, 10 slot-type bits, sync, 10 slot-type
//! bits, 98 info bits. The Golay-protected slot type yields the colour
//! code and the data type that drives the dispatch table.

use std::collections::VecDeque;

use log::debug;

use crate::fec::golay;
use crate::frame::slicer::Dibit;
use crate::frame::sync::{SyncCorrelator, SyncKind};

/// Dibits in each payload half (98 bits).
const HALF_DIBITS: usize = 49;
/// Dibits in each slot-type half (10 bits).
const SLOT_DIBITS: usize = 5;
/// Sync length in dibits.
const SYNC_DIBITS: usize = 24;
/// History needed once a sync is recognized: payload half + slot half +
/// the sync itself.
const PRE_DIBITS: usize = HALF_DIBITS + SLOT_DIBITS + SYNC_DIBITS;

/// A reassembled DMR data burst, FEC not yet applied.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub sync: SyncKind,
    /// 196 info bits, one per element.
    pub info_bits: Vec<u8>,
    /// Per-bit reliabilities aligned with `info_bits`.
    pub reliabilities: Vec<u8>,
    pub color_code: u8,
    pub data_type: u8,
    pub slot: u8,
}

/// What a fed dibit produced.
#[derive(Debug, Clone)]
pub enum FramerEvent {
    /// A data burst ready for the dispatch table.
    DmrData(RawFrame),
    /// A voice burst boundary on the given slot.
    DmrVoice { sync: SyncKind, slot: u8 },
    /// P25 sync seen; payload recovery is driven by the P25 layer.
    P25Sync(SyncKind),
    /// Slot type damaged beyond the Golay radius; burst dropped.
    SlotTypeUnreadable { slot: u8 },
}

enum State {
    Hunting,
    Collecting {
        sync: SyncKind,
        /// Payload half and slot half preceding the sync, captured at
        /// detection time.
        pre: Vec<Dibit>,
        collected: Vec<Dibit>,
    },
}

pub struct Framer {
    correlator: SyncCorrelator,
    history: VecDeque<Dibit>,
    state: State,
    slot: u8,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            correlator: SyncCorrelator::new(),
            history: VecDeque::with_capacity(PRE_DIBITS + 4),
            state: State::Hunting,
            slot: 0,
        }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Feed one sliced dibit.
    pub fn feed(&mut self, dibit: Dibit) -> Option<FramerEvent> {
        self.history.push_back(dibit);
        while self.history.len() > PRE_DIBITS {
            self.history.pop_front();
        }

        match &mut self.state {
            State::Hunting => {
                let kind = self.correlator.push(dibit.value)?;
                match kind {
                    SyncKind::P25Phase1 | SyncKind::P25Phase2 => {
                        self.correlator.reset();
                        Some(FramerEvent::P25Sync(kind))
                    }
                    k if k.is_voice() => {
                        self.correlator.reset();
                        let slot = self.advance_slot();
                        Some(FramerEvent::DmrVoice { sync: k, slot })
                    }
                    k => {
                        if self.history.len() < PRE_DIBITS {
                            // Not enough lead-in buffered for the first
                            // half; wait for the next burst.
                            self.correlator.reset();
                            return None;
                        }
                        let pre: Vec<Dibit> = self
                            .history
                            .iter()
                            .take(HALF_DIBITS + SLOT_DIBITS)
                            .copied()
                            .collect();
                        self.state = State::Collecting {
                            sync: k,
                            pre,
                            collected: Vec::with_capacity(HALF_DIBITS + SLOT_DIBITS),
                        };
                        None
                    }
                }
            }
            State::Collecting {
                sync,
                pre,
                collected,
            } => {
                collected.push(dibit);
                if collected.len() < HALF_DIBITS + SLOT_DIBITS {
                    return None;
                }
                let sync = *sync;
                let pre = std::mem::take(pre);
                let post = std::mem::take(collected);
                self.state = State::Hunting;
                self.correlator.reset();
                Some(self.finish_burst(sync, &pre, &post))
            }
        }
    }

    fn advance_slot(&mut self) -> u8 {
        let s = self.slot;
        self.slot ^= 1;
        s
    }

    fn finish_burst(&mut self, sync: SyncKind, pre: &[Dibit], post: &[Dibit]) -> FramerEvent {
        // Pre window captured at sync time: [49 info][5 slot].
        let pre_info = &pre[..HALF_DIBITS];
        let pre_slot = &pre[HALF_DIBITS..HALF_DIBITS + SLOT_DIBITS];
        let post_slot = &post[..SLOT_DIBITS];
        let post_info = &post[SLOT_DIBITS..];

        let slot = self.advance_slot();

        let mut slot_word = 0u32;
        for d in pre_slot.iter().chain(post_slot.iter()) {
            slot_word = (slot_word << 2) | u32::from(d.value);
        }
        let (slot_byte, fixed) = match golay::decode_20_8(slot_word) {
            Some(v) => v,
            None => return FramerEvent::SlotTypeUnreadable { slot },
        };
        if fixed > 0 {
            debug!("slot type corrected {} bits", fixed);
        }

        let mut info_bits = Vec::with_capacity(196);
        let mut reliabilities = Vec::with_capacity(196);
        for d in pre_info.iter().chain(post_info.iter()) {
            info_bits.push(d.value >> 1);
            info_bits.push(d.value & 1);
            reliabilities.push(d.reliability);
            reliabilities.push(d.reliability);
        }

        FramerEvent::DmrData(RawFrame {
            sync,
            info_bits,
            reliabilities,
            color_code: slot_byte >> 4,
            data_type: slot_byte & 0x0F,
            slot,
        })
    }
}
