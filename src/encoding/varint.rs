//! # Variable-Length Integer Encoding
//!
//! This module implements the source format's 1–9-byte big-endian varint,
//! used for cell payload sizes on index pages. It is not a general-purpose
//! integer codec: the byte order and the 9th-byte rule are dictated by the
//! on-disk format and must match it exactly.
//!
//! ## Encoding Format
//!
//! The most significant groups come first. Each of the first eight bytes
//! carries 7 payload bits and uses the high bit as a continuation flag; if
//! the encoding reaches a ninth byte, all 8 of its bits contribute:
//!
//! ```text
//! 1 byte:   0xxxxxxx                                      (7 bits)
//! 2 bytes:  1xxxxxxx 0xxxxxxx                             (14 bits)
//! ...
//! 8 bytes:  1xxxxxxx × 7, 0xxxxxxx                        (56 bits)
//! 9 bytes:  1xxxxxxx × 8, xxxxxxxx                        (64 bits)
//! ```
//!
//! ## Boundary Values
//!
//! Key boundary values for testing:
//!
//! - `0x7f`: maximum 1-byte value
//! - `0x80`: minimum 2-byte value
//! - `2^14 - 1` / `2^14`: 2-byte / 3-byte boundary
//! - `2^56 - 1`: maximum 8-byte value
//! - `2^56`: minimum 9-byte value
//! - `u64::MAX`: maximum 9-byte value
//!
//! ## Zero-Copy Design
//!
//! Both functions operate on byte slices directly; `decode_varint` reads
//! from a slice and returns `(value, bytes_read)`, `encode_varint` writes
//! the canonical (shortest) form into a caller-provided buffer and returns
//! the byte count. No heap allocations are performed.
//!
//! ## Error Handling
//!
//! `decode_varint` returns `eyre::Result` and fails only when the slice
//! ends before the encoding does. Non-canonical encodings (leading zero
//! groups) decode to the value they spell; the on-disk writer never
//! produces them.

use eyre::{ensure, Result};

pub fn varint_len(value: u64) -> usize {
    let mut n = 1;
    let mut v = value >> 7;
    while v != 0 && n < 8 {
        n += 1;
        v >>= 7;
    }
    if v != 0 {
        9
    } else {
        n
    }
}

pub fn encode_varint(value: u64, buf: &mut [u8; 9]) -> usize {
    let mut v = value;

    if v >> 56 != 0 {
        buf[8] = v as u8;
        v >>= 8;
        for i in (0..8).rev() {
            buf[i] = (v & 0x7f) as u8 | 0x80;
            v >>= 7;
        }
        return 9;
    }

    let n = varint_len(value);
    for i in (0..n).rev() {
        buf[i] = (v & 0x7f) as u8 | 0x80;
        v >>= 7;
    }
    buf[n - 1] &= 0x7f;
    n
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;

    for i in 0..8 {
        ensure!(
            i < buf.len(),
            "truncated varint: continuation bit set after {} bytes",
            buf.len()
        );

        let byte = buf[i];
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    ensure!(buf.len() >= 9, "truncated 9-byte varint: {} bytes", buf.len());
    value = (value << 8) | buf[8] as u64;
    Ok((value, 9))
}
