//! Fuzz target for keyfile document parsing.
//!
//! Keyfiles back the bundle manifest, the system configuration and
//! persisted slot status; the parser must reject malformed input with
//! an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slotup_common::KeyFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(doc) = KeyFile::parse(text) {
            // Reserialization of an accepted document must also parse.
            let _ = KeyFile::parse(&doc.to_text());
        }
    }
});
