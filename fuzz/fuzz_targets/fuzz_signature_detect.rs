//! Fuzz target for the detached/inline signature probe.
//!
//! The DER walk runs on the raw signature block before any trust
//! decision; arbitrary bytes must yield a verdict or an error, never a
//! panic or an out-of-bounds read.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = slotup_signature::is_detached(data);
});
