//! The wire: message encoding and the length-prefixed async framing
//! that carries it over a byte stream.

pub mod message;
pub mod wire;
