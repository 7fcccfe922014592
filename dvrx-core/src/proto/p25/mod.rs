//! P25 protocol handlers: identifier tables, the MAC VPDU walker, and the
//! trunking state machine.

pub mod iden;
pub mod mac;
pub mod trunking;
pub mod tsbk;
