#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use wire_protocol::codec::{decode_envelope, encode_envelope};

fuzz_target!(|data: &[u8]| {
    let mut buf = Bytes::copy_from_slice(data);

    // Decoding arbitrary input must never panic, only return Err.
    if let Ok(envelope) = decode_envelope(&mut buf) {
        // Anything that decodes must encode again.
        assert!(encode_envelope(&envelope).is_ok());
    }
});
