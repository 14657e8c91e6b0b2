//! Fuzz target for the bundle signature trailer.
//!
//! Structure-aware: assembles a container from arbitrary payload,
//! signature and length-field bytes, then checks the reader never
//! panics and every accepted trailer satisfies the documented bounds.

#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use slotup_bundle::{read_trailer, MAX_SIGNATURE_SIZE};

#[derive(Arbitrary, Debug)]
struct Container {
    payload: Vec<u8>,
    declared_len: u64,
}

fuzz_target!(|container: Container| {
    let mut bytes = container.payload;
    bytes.extend_from_slice(&container.declared_len.to_be_bytes());
    let file_size = bytes.len() as u64;

    if let Ok(trailer) = read_trailer(&mut Cursor::new(bytes)) {
        let sig_len = trailer.signature.len() as u64;
        assert!(sig_len > 0);
        assert!(sig_len <= MAX_SIGNATURE_SIZE);
        assert!(sig_len < file_size);
        assert_eq!(trailer.content_size, file_size - 8 - sig_len);
    }
});
