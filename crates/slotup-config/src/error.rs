//! Error types for configuration loading and slot state handling.

use thiserror::Error;

/// Errors raised while loading, validating or persisting configuration
/// and slot state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("missing [{0}] section")]
    MissingSection(String),

    #[error("missing '{key}' key in [{section}] section")]
    MissingKey { section: String, key: String },

    #[error("empty slot name in section '{0}'")]
    EmptySlotName(String),

    #[error("invalid slot type '{value}' for slot '{slot}'")]
    InvalidSlotType { slot: String, value: String },

    #[error("invalid bootloader: {0}")]
    InvalidBootloader(String),

    #[error("parent slot '{parent}' not found for slot '{slot}'")]
    UnknownParent { slot: String, parent: String },

    #[error("circular parent relationship detected for slot '{0}'")]
    ParentCycle(String),

    #[error("parent chain too deep for slot '{0}'")]
    ParentChainTooDeep(String),

    #[error("no slots defined in configuration")]
    NoSlots,

    #[error("no root slot classes found")]
    NoRootClass,

    #[error("no installable slot found for class '{0}'")]
    NoTargetSlot(String),

    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    #[error(transparent)]
    KeyFile(#[from] slotup_common::KeyFileError),

    #[error(transparent)]
    Checksum(#[from] slotup_common::ChecksumError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
