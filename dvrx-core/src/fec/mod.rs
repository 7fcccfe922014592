//! Forward-error-correction kernels.
//!
//! Everything here is a pure function over bit/byte buffers: kernels own
//! no state between calls and never touch the protocol layer. Soft
//! decoders take per-bit (or per-dibit) reliabilities in 0..255 and an
//! erasure threshold from [`crate::config::soft_erasure_threshold`].

pub mod bptc;
pub mod convolutional;
pub mod crc;
pub mod golay;
pub mod hamming;
pub mod reed_solomon;
pub mod trellis34;
