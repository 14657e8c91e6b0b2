//! The caller-facing update engine.
//!
//! One [`UpdateEngine`] lives per process. It owns the engine context,
//! enforces the one-install-at-a-time rule, runs the orchestrator on a
//! dedicated worker thread, and exposes the query surface the
//! surrounding agent or service needs: slot status, boot slot, bundle
//! info, current progress, last error.
//!
//! Progress and completion callbacks are invoked from the worker side
//! and must be treated as asynchronous notifications.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;
use slotup_boot::Bootchooser;
use slotup_bundle::{Bundle, BundleInfo};
use slotup_config::{EngineContext, SlotState, SlotStatus};
use tracing::{error, info};

use crate::error::{EngineError, InstallError, Result};
use crate::install::{self, InstallOptions};
use crate::progress::{InstallResult, ProgressEvent, ProgressReporter};

/// Callback invoked for each progress event.
pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + 'static>;

/// Callback invoked once with the terminal install result.
pub type CompletionCallback = Box<dyn FnOnce(&InstallResult) + Send + 'static>;

/// Agent-facing view of one slot, merged from configuration, runtime
/// state and persisted status.
#[derive(Debug, Clone, Serialize)]
pub struct SlotInfo {
    pub name: String,
    pub class: String,
    pub device: String,
    #[serde(rename = "type")]
    pub fs_type: String,
    pub bootname: Option<String>,
    pub state: String,
    pub booted: bool,
    pub bundle_compatible: Option<String>,
    pub bundle_version: Option<String>,
    pub bundle_build: Option<String>,
    pub installed_checksum: Option<String>,
    pub installed_count: u32,
    pub installed_timestamp: Option<String>,
    pub activated_count: u32,
    pub activated_timestamp: Option<String>,
}

struct EngineInner {
    context: Mutex<Option<Arc<Mutex<EngineContext>>>>,
    installing: AtomicBool,
    progress: Mutex<ProgressEvent>,
    last_error: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// The update engine. Cheap to clone handles are not provided; share
/// it behind an `Arc` if several components need access.
pub struct UpdateEngine {
    inner: Arc<EngineInner>,
}

impl Default for UpdateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                context: Mutex::new(None),
                installing: AtomicBool::new(false),
                progress: Mutex::new(ProgressEvent {
                    percentage: 0,
                    message: "No operation in progress".to_string(),
                    depth: 0,
                }),
                last_error: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Load configuration and discover slot states.
    pub fn initialize(&self, config_path: &Path) -> Result<()> {
        let ctx = EngineContext::load(config_path)?;
        *self.lock_context_slot() = Some(Arc::new(Mutex::new(ctx)));
        info!(config = %config_path.display(), "engine initialized");
        Ok(())
    }

    /// Like [`UpdateEngine::initialize`] with the kernel command line
    /// supplied by the caller.
    pub fn initialize_with_cmdline(&self, config_path: &Path, cmdline: &str) -> Result<()> {
        let ctx = EngineContext::load_with_cmdline(config_path, cmdline)?;
        *self.lock_context_slot() = Some(Arc::new(Mutex::new(ctx)));
        Ok(())
    }

    fn lock_context_slot(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<Arc<Mutex<EngineContext>>>> {
        self.inner.context.lock().expect("context slot poisoned")
    }

    fn context(&self) -> Result<Arc<Mutex<EngineContext>>> {
        self.lock_context_slot()
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    /// Start installing a bundle from disk.
    ///
    /// Returns immediately; the pipeline runs on a worker thread and
    /// reports through the callbacks. A second install while one is in
    /// progress is rejected, not queued.
    pub fn install(
        &self,
        bundle_path: &Path,
        options: InstallOptions,
        on_progress: Option<ProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) -> Result<()> {
        let ctx = self.context()?;
        let path = bundle_path.to_path_buf();
        self.spawn_install(
            move |reporter| install::install_from_file(&ctx, &path, &options, reporter),
            on_progress,
            on_complete,
        )
    }

    /// Start the pipeline on an already opened (and possibly already
    /// verified) bundle. The open/verify cost is not paid twice when
    /// the caller inspected the bundle first.
    pub fn install_opened_bundle(
        &self,
        bundle: Bundle,
        options: InstallOptions,
        on_progress: Option<ProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) -> Result<()> {
        let ctx = self.context()?;
        self.spawn_install(
            move |reporter| install::run_install(&ctx, bundle, &options, reporter),
            on_progress,
            on_complete,
        )
    }

    fn spawn_install(
        &self,
        job: impl FnOnce(&ProgressReporter) -> std::result::Result<(), InstallError>
            + Send
            + 'static,
        on_progress: Option<ProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) -> Result<()> {
        if self.inner.installing.swap(true, Ordering::SeqCst) {
            return Err(EngineError::InstallInProgress);
        }

        *self.inner.last_error.lock().expect("last_error poisoned") = None;

        let inner = self.inner.clone();
        let worker = std::thread::spawn(move || {
            let (reporter, rx) = ProgressReporter::channel();

            // Forwarder: drains the progress channel, keeps the
            // poll-able snapshot current and invokes the caller's
            // callback. Joined before completion fires so completion
            // always observes the final progress state.
            let forwarder_inner = inner.clone();
            let forwarder = std::thread::spawn(move || {
                for event in rx {
                    *forwarder_inner.progress.lock().expect("progress poisoned") = event.clone();
                    if let Some(cb) = &on_progress {
                        cb(&event);
                    }
                }
            });

            let outcome = job(&reporter);
            drop(reporter);
            let _ = forwarder.join();

            let result = match outcome {
                Ok(()) => InstallResult {
                    success: true,
                    message: "Installation completed successfully".to_string(),
                },
                Err(err) => {
                    let message = err.to_string();
                    error!(error = %message, "install failed");
                    *inner.last_error.lock().expect("last_error poisoned") =
                        Some(message.clone());
                    InstallResult {
                        success: false,
                        message,
                    }
                }
            };

            if let Some(cb) = on_complete {
                cb(&result);
            }
            inner.installing.store(false, Ordering::SeqCst);
        });

        *self.inner.worker.lock().expect("worker poisoned") = Some(worker);
        Ok(())
    }

    /// Block until the current install worker (if any) finishes.
    pub fn wait(&self) {
        let handle = self.inner.worker.lock().expect("worker poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn is_installing(&self) -> bool {
        self.inner.installing.load(Ordering::SeqCst)
    }

    /// Latest progress checkpoint.
    pub fn get_current_progress(&self) -> ProgressEvent {
        self.inner.progress.lock().expect("progress poisoned").clone()
    }

    /// Message of the last failed install, if any.
    pub fn get_last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .expect("last_error poisoned")
            .clone()
    }

    /// The system's compatible string.
    pub fn get_compatible(&self) -> Result<String> {
        let ctx = self.context()?;
        let guard = ctx.lock().expect("engine context lock poisoned");
        Ok(guard.compatible().to_string())
    }

    /// Name of the currently booted slot, if one was identified.
    pub fn get_boot_slot(&self) -> Result<Option<String>> {
        let ctx = self.context()?;
        let guard = ctx.lock().expect("engine context lock poisoned");
        Ok(guard.booted_slot().map(|s| s.name.clone()))
    }

    /// Current primary boot slot according to the bootloader.
    pub fn get_primary(&self, bootloader_tool: Option<&Path>) -> Result<String> {
        let ctx = self.context()?;
        let guard = ctx.lock().expect("engine context lock poisoned");
        let chooser = match bootloader_tool {
            Some(tool) => Bootchooser::with_tool(&guard, tool)?,
            None => Bootchooser::from_context(&guard)?,
        };
        Ok(chooser.get_primary()?.name.clone())
    }

    /// All slots with their runtime state and persisted status.
    pub fn get_slot_status(&self) -> Result<Vec<SlotInfo>> {
        let ctx = self.context()?;
        let guard = ctx.lock().expect("engine context lock poisoned");
        let data_dir = guard.data_directory().to_path_buf();

        let mut infos = Vec::new();
        for slot in guard.system_slots.values() {
            let status = SlotStatus::load(&data_dir, slot)?.unwrap_or_default();
            infos.push(SlotInfo {
                name: slot.name.clone(),
                class: slot.class.clone(),
                device: slot.device.clone(),
                fs_type: slot.fs_type.clone(),
                bootname: slot.bootname.clone(),
                state: slot.state.as_str().to_string(),
                booted: slot.state == SlotState::Booted,
                bundle_compatible: status.bundle_compatible,
                bundle_version: status.bundle_version,
                bundle_build: status.bundle_build,
                installed_checksum: status.checksum.map(|c| c.to_string()),
                installed_count: status.installed_count,
                installed_timestamp: status.installed_timestamp,
                activated_count: status.activated_count,
                activated_timestamp: status.activated_timestamp,
            });
        }
        Ok(infos)
    }

    /// Open a bundle read-only and report its manifest summary.
    pub fn get_bundle_info(&self, bundle_path: &Path) -> Result<BundleInfo> {
        let ctx = self.context()?;
        let mount_prefix = {
            let guard = ctx.lock().expect("engine context lock poisoned");
            guard.mount_prefix().to_path_buf()
        };

        let mut bundle = Bundle::open(bundle_path, &mount_prefix)?;
        Ok(bundle.info()?)
    }

    /// Mark a slot good or bad in the bootloader and persist the new
    /// health state.
    pub fn mark_slot(
        &self,
        slot_name: &str,
        good: bool,
        bootloader_tool: Option<&Path>,
    ) -> Result<()> {
        let ctx = self.context()?;
        let mut guard = ctx.lock().expect("engine context lock poisoned");

        let slot = guard
            .slot(slot_name)
            .cloned()
            .ok_or_else(|| slotup_config::ConfigError::UnknownSlot(slot_name.to_string()))?;

        let chooser = match bootloader_tool {
            Some(tool) => Bootchooser::with_tool(&guard, tool)?,
            None => Bootchooser::from_context(&guard)?,
        };
        chooser.set_state(&slot, good)?;

        let data_dir = guard.data_directory().to_path_buf();
        let new_state = if good { SlotState::Good } else { SlotState::Bad };
        let mut status = SlotStatus::load(&data_dir, &slot)?.unwrap_or_default();
        status.status = Some(new_state.as_str().to_string());
        status.save(&data_dir, &slot)?;

        if let Some(slot) = guard.slot_mut(slot_name) {
            slot.state = new_state;
        }

        info!(slot = %slot_name, good, "slot health updated");
        Ok(())
    }
}
