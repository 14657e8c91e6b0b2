//! Shared foundation for the slotup update engine.
//!
//! This crate provides the pieces every other slotup crate leans on:
//! - Streaming checksum computation and verification
//! - The keyfile reader/writer used by manifests, system config and
//!   slot status documents
//! - External tool execution with captured output

pub mod checksum;
pub mod keyfile;
pub mod tool;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumError};
pub use keyfile::{KeyFile, KeyFileError};
pub use tool::{run_tool, ToolError, ToolOutput};
