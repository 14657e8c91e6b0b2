//! Error types for bootloader environment operations.

use thiserror::Error;

/// Errors from reading or writing the bootloader environment.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("unsupported bootloader: {0}")]
    UnsupportedBootloader(String),

    #[error("no bootloader configured")]
    NoBootloaderConfigured,

    #[error("GRUB environment path not configured")]
    NoGrubEnvPath,

    #[error("slot '{0}' has no bootname")]
    NoBootname(String),

    #[error("empty boot order")]
    EmptyBootOrder,

    #[error("no good primary slot found")]
    NoGoodSlot,

    #[error(transparent)]
    Tool(#[from] slotup_common::ToolError),
}

/// Result type alias for bootchooser operations.
pub type Result<T> = std::result::Result<T, BootError>;
