//! Error types for bundle operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening, parsing or verifying a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle file not found: '{0}'")]
    NotFound(PathBuf),

    #[error("bundle is not a regular file: '{0}'")]
    NotRegularFile(PathBuf),

    #[error("bundle too small to carry a signature trailer ({size} bytes)")]
    TooSmall { size: u64 },

    #[error("signature size is 0")]
    SignatureEmpty,

    #[error("signature size ({size}) exceeds 64KiB")]
    SignatureTooLarge { size: u64 },

    #[error("signature size ({size}) exceeds bundle size ({file_size})")]
    SignatureExceedsFile { size: u64, file_size: u64 },

    #[error("bundle manifest not found at '{0}'")]
    MissingManifest(PathBuf),

    #[error("missing required [update] section in manifest")]
    ManifestMissingUpdateSection,

    #[error("missing '{key}' in manifest section '{section}'")]
    ManifestMissingKey { section: String, key: String },

    #[error("manifest image '{0}' carries no recognized checksum (sha256/sha1/md5)")]
    ImageMissingChecksum(String),

    #[error("manifest declares more than one image for slot class '{0}'")]
    DuplicateImageClass(String),

    #[error("no image sections found in manifest")]
    NoImages,

    #[error("no image found for slot class '{0}'")]
    NoImageForClass(String),

    #[error("manifest not loaded")]
    ManifestNotLoaded,

    #[error("bundle compatible '{bundle}' does not match system compatible '{system}'")]
    Incompatible { bundle: String, system: String },

    #[error("bundle image not found: '{0}'")]
    MissingImage(PathBuf),

    #[error("image checksum verification failed for '{filename}': {source}")]
    ImageChecksum {
        filename: String,
        #[source]
        source: slotup_common::ChecksumError,
    },

    #[error(transparent)]
    Signature(#[from] slotup_signature::SignatureError),

    #[error(transparent)]
    KeyFile(#[from] slotup_common::KeyFileError),

    #[error("mount failed: {0}")]
    Mount(slotup_common::ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bundle operations.
pub type Result<T> = std::result::Result<T, BundleError>;
