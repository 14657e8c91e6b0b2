//! Configuration and slot state for the slotup update engine.
//!
//! This crate provides:
//! - Typed parsing and validation of the system configuration
//! - The slot model with class grouping and parent resolution
//! - Persisted per-slot status under the data directory
//! - The process-wide [`EngineContext`]

pub mod context;
pub mod error;
pub mod slot;
pub mod status;
pub mod system;

pub use context::EngineContext;
pub use error::{ConfigError, Result};
pub use slot::{class_of, Slot, SlotState, VALID_SLOT_TYPES};
pub use status::{checksum_data_directory, prune_data_directories, SlotStatus};
pub use system::{SystemConfig, DEFAULT_CONFIG_PATH, VALID_BOOTLOADERS};
