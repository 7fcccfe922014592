//! Symbol-to-PDU framing: slicing, sync search, burst classification,
//! FEC/CRC dispatch, and multi-block data assembly.

pub mod assembler;
pub mod burst;
pub mod framer;
pub mod slicer;
pub mod sync;
