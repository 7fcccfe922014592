//! Structured decoder events.
//!
//! Every decoded (or rejected) PDU becomes one typed event; rendering to
//! JSON is a pure function over the variant. Consumers plug in through
//! [`EventSink`]; the library never formats text ad hoc.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    Crc,
    FecIrrecoverable,
    OutOfSequence,
    EncryptionLockout,
}

/// Patch-group flavour carried by regroup signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegroupKind {
    Patch,
    SimulSelect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    GroupGrant {
        tg: u32,
        src: u32,
        channel: u16,
        freq_hz: u64,
    },
    IndivGrant {
        dst: u32,
        src: u32,
        channel: u16,
        freq_hz: u64,
    },
    Release {
        forced: bool,
    },
    EncryptionLockout {
        tg: u32,
        alg: u8,
        keyid: u16,
    },
    FrameRejected {
        kind: RejectKind,
        summary: String,
    },
    NeighborUpdate {
        freqs_hz: Vec<u64>,
    },
    IdenUpdate {
        iden: u8,
        base_freq_hz: u64,
        spacing_hz: u32,
        tdma: bool,
    },
    Registration {
        rid: u32,
        accepted: bool,
    },
    Deregistration {
        rid: u32,
    },
    PatchUpdate {
        sg: u32,
        kind: RegroupKind,
        active: bool,
        wgids: Vec<u32>,
    },
    TalkerAlias {
        src: u32,
        alias: String,
    },
    DataPdu {
        sap: u8,
        src: u32,
        dst: u32,
        octets: usize,
        summary: String,
    },
    Csbk {
        opcode: u8,
        fid: u8,
        summary: String,
    },
    UnknownOpcode {
        mfid: u8,
        opcode: u8,
    },
    SiteStatus {
        wacn: u32,
        sysid: u16,
        rfss: u8,
        site: u8,
    },
    MicroslotCounter {
        value: u32,
    },
}

/// One emitted event with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    /// Protocol tag, e.g. "p25" or "dmr".
    pub protocol: &'static str,
    /// TDMA slot the event belongs to, when slot-scoped.
    pub slot: Option<u8>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    pub fn new(protocol: &'static str, slot: Option<u8>, event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            protocol,
            slot,
            event,
        }
    }
}

/// Render one record as a JSON line.
pub fn to_json(record: &EventRecord) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| String::from("{}"))
}

/// Sink for decoder events.
pub trait EventSink {
    fn emit(&mut self, record: EventRecord);
}

/// Collecting sink used by tests and by the CLI driver.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<EventRecord>,
}

impl EventSink for VecSink {
    fn emit(&mut self, record: EventRecord) {
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_carries_tag_and_envelope() {
        let rec = EventRecord::new(
            "p25",
            Some(0),
            Event::GroupGrant {
                tg: 100,
                src: 9001,
                channel: 0x1042,
                freq_hz: 851_825_000,
            },
        );
        let json = to_json(&rec);
        assert!(json.contains("\"event\":\"group_grant\""));
        assert!(json.contains("\"protocol\":\"p25\""));
        assert!(json.contains("851825000"));
    }

    #[test]
    fn rejected_frames_carry_the_failure_kind() {
        let rec = EventRecord::new(
            "dmr",
            Some(1),
            Event::FrameRejected {
                kind: RejectKind::OutOfSequence,
                summary: "expected DBSN 3, got 5".into(),
            },
        );
        assert!(to_json(&rec).contains("out_of_sequence"));
    }
}
