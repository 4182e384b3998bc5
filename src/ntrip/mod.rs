//! NTRIP 1.0 handshake.

pub mod request;
pub mod response;
