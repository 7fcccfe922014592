//! dvrx core library
//!
//! A software-defined-radio digital-voice decoder core: CQPSK symbol
//! recovery (band-edge FLL, Gardner timing, Costas carrier loop), the
//! DMR/P25 FEC kernel family, burst framing with multi-block data
//! assembly, P25 MAC/trunking control, and DMR data-PDU decryption.
//! External collaborators (device capture, audio sinks, key loading)
//! connect through the ring, event-sink and tuner traits; nothing here
//! blocks on them.

pub mod config;
pub mod context;
pub mod dsp;
pub mod errors;
pub mod event;
pub mod fec;
pub mod frame;
pub mod keystore;
pub mod pipeline;
pub mod proto;
pub mod ring;

// Re-export the canonical processing surface.
pub use config::{DemodConfig, TrunkConfig};
pub use errors::{DvrxError, Result};
pub use event::{Event, EventRecord, EventSink};
pub use pipeline::Pipeline;
pub use proto::p25::trunking::Tuner;
