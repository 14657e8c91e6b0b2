//! Error types for the install orchestrator and engine API.

use thiserror::Error;

/// Errors from a single install run.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("bundle signature verification failed: {0}")]
    Signature(#[from] slotup_signature::SignatureError),

    #[error(transparent)]
    Bundle(#[from] slotup_bundle::BundleError),

    #[error(transparent)]
    Config(#[from] slotup_config::ConfigError),

    #[error(transparent)]
    Boot(#[from] slotup_boot::BootError),

    #[error("slot class mismatch: slot '{slot}' has class '{slot_class}', image requires '{image_class}'")]
    SlotClassMismatch {
        slot: String,
        slot_class: String,
        image_class: String,
    },

    #[error("failed to mount slot '{slot}': {source}")]
    SlotMount {
        slot: String,
        #[source]
        source: slotup_common::ToolError,
    },

    #[error("failed to write slot device '{device}': {source}")]
    SlotWrite {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("post-copy verification failed for slot '{slot}': {source}")]
    PostCopyVerification {
        slot: String,
        #[source]
        source: slotup_common::ChecksumError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the caller-facing engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("an installation is already in progress")]
    InstallInProgress,

    #[error(transparent)]
    Config(#[from] slotup_config::ConfigError),

    #[error(transparent)]
    Bundle(#[from] slotup_bundle::BundleError),

    #[error(transparent)]
    Boot(#[from] slotup_boot::BootError),

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
