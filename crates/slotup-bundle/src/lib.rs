//! Bundle container and manifest reading for the slotup update engine.
//!
//! A bundle is a signed container: a filesystem image holding the
//! manifest and the per-slot-class images, followed by a signature
//! block and an 8-byte big-endian length trailer. This crate opens
//! bundles through a scoped loop mount, validates the trailer bounds
//! before trusting anything else, and layers signature, compatibility
//! and content verification on top.

pub mod bundle;
pub mod error;
pub mod manifest;
pub mod mount;
pub mod trailer;

pub use bundle::{Bundle, BundleInfo};
pub use error::{BundleError, Result};
pub use manifest::{Image, Manifest, MANIFEST_FILENAME};
pub use mount::LoopMount;
pub use trailer::{read_trailer, Trailer, MAX_SIGNATURE_SIZE};

#[cfg(any(test, feature = "test-utils"))]
pub use bundle::testkit;
