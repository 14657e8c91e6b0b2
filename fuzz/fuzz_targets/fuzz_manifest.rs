//! Fuzz target for bundle manifest parsing.
//!
//! Manifests arrive inside untrusted bundles; parsing happens before
//! signature verification in the info path, so arbitrary input must
//! only ever produce an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slotup_bundle::Manifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Manifest::parse(text);
    }
});
