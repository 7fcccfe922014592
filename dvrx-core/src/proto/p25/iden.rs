//! Channel-identifier tables and channel→frequency resolution.
//!
//! Identifier updates are only believed when their provenance matches the
//! site identity currently observed on the control channel (or when the
//! user hard-sets an entry). Untrusted entries never resolve, so a rogue
//! or stale IDEN_UP can never steer the tuner.

use log::{debug, info};

/// Site identity observed on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteId {
    pub wacn: u32,
    pub sysid: u16,
    pub rfss: u8,
    pub site: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trust {
    Untrusted,
    Observed,
    Confirmed,
}

/// One identifier-update entry, indexed by the 4-bit iden.
#[derive(Debug, Clone, PartialEq)]
pub struct IdenEntry {
    pub iden: u8,
    /// Base frequency in 5 Hz units.
    pub base_freq_5hz: u64,
    /// Channel spacing in 125 Hz units.
    pub spacing_125hz: u32,
    /// Signed transmit offset; sign carried in bit 13 on the wire.
    pub tx_offset: i32,
    pub tdma: bool,
    pub channel_type: u8,
    pub source: Option<SiteId>,
    pub trust: Trust,
}

impl IdenEntry {
    /// Decode the 14-bit signed transmit-offset field.
    pub fn decode_offset(raw: u16) -> i32 {
        let magnitude = i32::from(raw & 0x1FFF);
        if raw & 0x2000 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }
}

#[derive(Debug, Default)]
pub struct IdenTable {
    entries: [Option<IdenEntry>; 16],
    site: Option<SiteId>,
}

impl IdenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the site identity seen on the control channel; pending
    /// observed entries from this site become confirmed.
    pub fn set_site(&mut self, site: SiteId) {
        self.site = Some(site);
        for entry in self.entries.iter_mut().flatten() {
            if entry.trust == Trust::Observed && entry.source == Some(site) {
                entry.trust = Trust::Confirmed;
            }
        }
    }

    pub fn site(&self) -> Option<SiteId> {
        self.site
    }

    /// Apply an identifier update heard on the air.
    ///
    /// A trusted entry is never overwritten by a mismatching update; the
    /// update is dropped instead.
    pub fn update(&mut self, mut entry: IdenEntry, from: Option<SiteId>) {
        let idx = usize::from(entry.iden & 0xF);
        entry.source = from;
        entry.trust = match (from, self.site) {
            (Some(src), Some(site)) if src == site => Trust::Confirmed,
            (Some(_), _) => Trust::Observed,
            (None, _) => Trust::Observed,
        };

        if let Some(existing) = &self.entries[idx] {
            if existing.trust == Trust::Confirmed
                && entry.trust < Trust::Confirmed
                && (existing.base_freq_5hz != entry.base_freq_5hz
                    || existing.spacing_125hz != entry.spacing_125hz)
            {
                debug!(
                    "ignoring untrusted iden {} update conflicting with confirmed entry",
                    entry.iden
                );
                return;
            }
        }
        info!(
            "iden {} base {} Hz spacing {} Hz tdma {} ({:?})",
            entry.iden,
            entry.base_freq_5hz * 5,
            u64::from(entry.spacing_125hz) * 125,
            entry.tdma,
            entry.trust
        );
        self.entries[idx] = Some(entry);
    }

    /// User-supplied entry: explicitly trusted regardless of provenance.
    pub fn hard_set(&mut self, mut entry: IdenEntry) {
        entry.trust = Trust::Confirmed;
        let idx = usize::from(entry.iden & 0xF);
        self.entries[idx] = Some(entry);
    }

    pub fn entry(&self, iden: u8) -> Option<&IdenEntry> {
        self.entries[usize::from(iden & 0xF)].as_ref()
    }

    /// Resolve a 16-bit channel (iden in the top nibble) to its downlink
    /// frequency in Hz. Returns `None` for untrusted or absent entries.
    pub fn resolve(&self, channel: u16) -> Option<u64> {
        let iden = (channel >> 12) as u8;
        let chan_num = u64::from(channel & 0x0FFF);
        let entry = self.entry(iden)?;
        if entry.trust != Trust::Confirmed {
            return None;
        }
        Some(entry.base_freq_5hz * 5 + chan_num * u64::from(entry.spacing_125hz) * 125)
    }

    /// Uplink frequency: downlink plus the signed offset in 250 kHz units.
    pub fn resolve_uplink(&self, channel: u16) -> Option<u64> {
        let down = self.resolve(channel)?;
        let entry = self.entry((channel >> 12) as u8)?;
        Some((down as i64 + i64::from(entry.tx_offset) * 250_000) as u64)
    }

    /// TDMA slot addressed by a channel number, when the iden is TDMA.
    pub fn slot_of(&self, channel: u16) -> Option<u8> {
        let entry = self.entry((channel >> 12) as u8)?;
        entry.tdma.then_some((channel & 1) as u8)
    }
}
