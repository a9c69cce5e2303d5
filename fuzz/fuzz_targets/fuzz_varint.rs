//! Fuzz testing for the varint codec.
//!
//! Decoding arbitrary bytes must never panic, and every decoded value
//! must re-encode to a form that decodes back to itself.

#![no_main]

use libfuzzer_sys::fuzz_target;

use sos::encoding::{decode_varint, encode_varint};

fuzz_target!(|data: &[u8]| {
    let Ok((value, len)) = decode_varint(data) else {
        return;
    };
    assert!((1..=9).contains(&len));

    let mut buf = [0u8; 9];
    let encoded_len = encode_varint(value, &mut buf);
    let (roundtrip, roundtrip_len) = decode_varint(&buf[..encoded_len]).expect("canonical form");

    assert_eq!(roundtrip, value);
    assert_eq!(roundtrip_len, encoded_len);
});
