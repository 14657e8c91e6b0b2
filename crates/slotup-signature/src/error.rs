//! Error types for signature verification.

use thiserror::Error;

/// Errors from signature parsing, trust-store setup or verification.
///
/// Every variant is terminal for the operation that produced it; there
/// is no partial-success path through signature handling.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signature block is not a parseable PKCS#7/CMS structure.
    #[error("failed to parse signature: {0}")]
    Parse(String),

    /// The signature parses but is not a signed-data structure.
    #[error("signature has unexpected content type (expected signed-data)")]
    UnsupportedContentType,

    /// A detached signature was given no content to verify against.
    #[error("detached signature requires external content")]
    DetachedContentRequired,

    /// An inline signature was handed external content.
    #[error("inline signature carries its own payload, external content not allowed")]
    InlineContentUnexpected,

    /// The cryptographic verification itself failed.
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// The verified structure contains no signer certificate.
    #[error("no signer certificate found in signature")]
    NoSigner,

    /// None of the candidate CA sources could be loaded.
    #[error("no usable CA certificate; tried: {tried}")]
    NoUsableTrustAnchor { tried: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<openssl::error::ErrorStack> for SignatureError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        SignatureError::Verification(err.to_string())
    }
}

/// Result type alias for signature operations.
pub type Result<T> = std::result::Result<T, SignatureError>;
