//! The bundle container trailer.
//!
//! A bundle is an arbitrary filesystem image, followed by a signature
//! block, followed by an 8-byte big-endian unsigned integer giving the
//! signature block's length. The trailer bounds are validated before
//! any other field is trusted; a corrupt or adversarial length field
//! must never reach the signature verifier.

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::{BundleError, Result};

/// Upper bound for the signature block length.
pub const MAX_SIGNATURE_SIZE: u64 = 64 * 1024;

/// Width of the trailing length field.
const LENGTH_FIELD_SIZE: u64 = 8;

/// The decoded trailer of a bundle file.
#[derive(Debug)]
pub struct Trailer {
    /// The raw signature block.
    pub signature: Vec<u8>,
    /// Bytes of payload preceding the signature block.
    pub content_size: u64,
}

/// Read and bounds-check the signature trailer of an open bundle file.
pub fn read_trailer<R: Read + Seek>(file: &mut R) -> Result<Trailer> {
    let file_size = file.seek(SeekFrom::End(0))?;
    if file_size <= LENGTH_FIELD_SIZE {
        return Err(BundleError::TooSmall { size: file_size });
    }

    file.seek(SeekFrom::End(-(LENGTH_FIELD_SIZE as i64)))?;
    let mut len_buf = [0u8; LENGTH_FIELD_SIZE as usize];
    file.read_exact(&mut len_buf)?;
    let sig_size = u64::from_be_bytes(len_buf);

    if sig_size == 0 {
        return Err(BundleError::SignatureEmpty);
    }
    if sig_size > MAX_SIGNATURE_SIZE {
        return Err(BundleError::SignatureTooLarge { size: sig_size });
    }
    // The signature must fit between the start of the file and the
    // length field.
    if sig_size > file_size - LENGTH_FIELD_SIZE {
        return Err(BundleError::SignatureExceedsFile {
            size: sig_size,
            file_size,
        });
    }

    let content_size = file_size - LENGTH_FIELD_SIZE - sig_size;
    file.seek(SeekFrom::Start(content_size))?;
    let mut signature = vec![0u8; sig_size as usize];
    file.read_exact(&mut signature)?;

    debug!(sig_size, content_size, "read bundle signature trailer");
    Ok(Trailer {
        signature,
        content_size,
    })
}

/// Append a signature block and its length field to a payload, forming
/// the container layout. Used by fixtures; bundle creation tooling is
/// out of scope.
#[cfg(any(test, feature = "test-utils"))]
pub fn append_signature(payload: &mut Vec<u8>, signature: &[u8]) {
    payload.extend_from_slice(signature);
    payload.extend_from_slice(&(signature.len() as u64).to_be_bytes());
}
