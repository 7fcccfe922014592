//! Shared decoder state: every table the protocol handlers and the UI
//! read lives in one context owned by the protocol thread. Single writer,
//! snapshot readers; nothing here is global.

use std::collections::{BTreeMap, BTreeSet};

use crate::event::RegroupKind;
use crate::proto::p25::iden::IdenTable;
use crate::ring::AudioRing;

/// Group-call disposition from the allow/block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    #[default]
    Allow,
    Block,
    /// Encrypted lockout: recorded once, never tuned again.
    DigitalEnc,
}

/// Patch / simul-select supergroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGroup {
    pub kind: RegroupKind,
    pub active: bool,
    pub key_id: u16,
    pub alg_id: u8,
    pub ssn: u8,
    pub wgids: BTreeSet<u32>,
    pub wuids: BTreeSet<u32>,
}

impl PatchGroup {
    pub fn new(kind: RegroupKind) -> Self {
        Self {
            kind,
            active: false,
            key_id: 0,
            alg_id: 0,
            ssn: 0,
            wgids: BTreeSet::new(),
            wuids: BTreeSet::new(),
        }
    }
}

/// Per-slot call state.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    pub alg: u8,
    pub keyid: u16,
    pub mi: Vec<u8>,
    pub tg: u32,
    src: u32,
    /// Talker alias for the current source; cleared whenever the source
    /// changes.
    alias: Option<String>,
    pub emergency: bool,
    pub call_priority: u8,
}

impl SlotState {
    pub fn src(&self) -> u32 {
        self.src
    }

    /// Update the source, dropping the alias cache on change.
    pub fn set_src(&mut self, src: u32) {
        if self.src != src {
            self.alias = None;
        }
        self.src = src;
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: String) {
        self.alias = Some(alias);
    }

    pub fn append_alias_fragment(&mut self, fragment: &str) {
        match &mut self.alias {
            Some(a) => a.push_str(fragment),
            None => self.alias = Some(fragment.to_string()),
        }
    }
}

/// All shared decoder tables.
pub struct CoreContext {
    pub iden: IdenTable,
    pub groups: BTreeMap<u32, GroupMode>,
    pub patches: BTreeMap<u32, PatchGroup>,
    pub affiliations: BTreeSet<u32>,
    pub slots: [SlotState; 2],
    /// Voice frequency noted for display while already tuned.
    pub vc_freq_display: u64,
    pub audio: [AudioRing; 2],
}

impl CoreContext {
    pub fn new() -> Self {
        Self {
            iden: IdenTable::new(),
            groups: BTreeMap::new(),
            patches: BTreeMap::new(),
            affiliations: BTreeSet::new(),
            slots: [SlotState::default(), SlotState::default()],
            vc_freq_display: 0,
            audio: [AudioRing::with_capacity(4800), AudioRing::with_capacity(4800)],
        }
    }

    pub fn group_mode(&self, tg: u32) -> GroupMode {
        self.groups.get(&tg).copied().unwrap_or_default()
    }

    /// Mark a talkgroup locked out for encryption. Returns true the first
    /// time only, so lockout events fire exactly once.
    pub fn lockout_group(&mut self, tg: u32) -> bool {
        match self.groups.insert(tg, GroupMode::DigitalEnc) {
            Some(GroupMode::DigitalEnc) => false,
            _ => true,
        }
    }

    pub fn flush_audio(&self) {
        for ring in &self.audio {
            ring.flush();
        }
    }

    /// Snapshot of the affiliation table for UI readers.
    pub fn affiliation_snapshot(&self) -> Vec<u32> {
        self.affiliations.iter().copied().collect()
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::new()
    }
}
