//! slotup core: install orchestration and the engine API.
//!
//! This crate ties the pieces together: it opens and verifies bundles,
//! resolves target slots per the A/B policy, streams images onto slot
//! devices, persists slot status, drives the bootchooser, and exposes
//! the caller-facing [`UpdateEngine`] surface plus the `slotup` CLI.

pub mod engine;
pub mod error;
pub mod install;
pub mod logging;
pub mod progress;

pub use engine::{CompletionCallback, ProgressCallback, SlotInfo, UpdateEngine};
pub use error::{EngineError, InstallError, Result};
pub use install::{InstallOptions, DEFAULT_CA_CANDIDATES};
pub use progress::{InstallResult, ProgressEvent, ProgressReporter};
