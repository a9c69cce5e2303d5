//! # Encoding Primitives
//!
//! Wire-level integer encoding shared by the page decoder and the engine's
//! cell writer. Currently a single member: the format's big-endian varint.

pub mod varint;

pub use varint::{decode_varint, encode_varint, varint_len};
