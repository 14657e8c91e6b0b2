//! The install orchestrator.
//!
//! A linear pipeline with no loops back:
//! verify signature (skipped when the bundle is already verified) →
//! compatibility check → content check → per-image copy → status update
//! → bootloader activation → optional reboot. Any step failure ends the
//! run in the failed state; a failed copy leaves the target slot's
//! persisted status marked bad so the bootchooser's good-slot search
//! skips it on the next boot-order evaluation. There is no automatic
//! rollback and no retry.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use slotup_boot::Bootchooser;
use slotup_bundle::{Bundle, Image};
use slotup_common::{run_tool, Checksum};
use slotup_config::{
    checksum_data_directory, prune_data_directories, EngineContext, Slot, SlotState, SlotStatus,
};
use slotup_signature::TrustStore;
use tracing::{debug, error, info, warn};

use crate::error::InstallError;
use crate::progress::ProgressReporter;

/// Copy chunk size for image writes.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// CA locations tried when the configuration names none.
pub const DEFAULT_CA_CANDIDATES: &[&str] = &[
    "/etc/slotup/ca.cert.pem",
    "/etc/ssl/certs/ca-certificates.crt",
];

/// Knobs for a single install run.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Re-read the written slot and verify size + digest after the
    /// copy. Off by default; the standard install path trusts the
    /// fsynced write and the pre-copy content check.
    pub verify_after_copy: bool,
    /// Request a system reboot after a successful install.
    pub auto_reboot: bool,
    /// Override the bootloader environment editor executable.
    pub bootloader_tool: Option<PathBuf>,
    /// Override the CA candidate list for signature verification.
    pub trust_candidates: Option<Vec<PathBuf>>,
}

/// Bundle identity carried into slot status records.
#[derive(Debug, Clone)]
struct BundleMeta {
    compatible: String,
    version: Option<String>,
    description: Option<String>,
    build: Option<String>,
}

/// One image scheduled for installation into a resolved target slot.
#[derive(Debug)]
struct InstallTask {
    slot: Slot,
    image: Image,
    image_path: PathBuf,
}

fn lock(ctx: &Mutex<EngineContext>) -> MutexGuard<'_, EngineContext> {
    ctx.lock().expect("engine context lock poisoned")
}

/// Open a bundle from disk and run the full install pipeline on it.
pub fn install_from_file(
    ctx: &Mutex<EngineContext>,
    bundle_path: &Path,
    options: &InstallOptions,
    reporter: &ProgressReporter,
) -> Result<(), InstallError> {
    reporter.report(
        0,
        format!("Opening bundle '{}'", bundle_path.display()),
        0,
    );
    let mount_prefix = lock(ctx).mount_prefix().to_path_buf();
    let bundle = Bundle::open(bundle_path, &mount_prefix)?;
    run_install(ctx, bundle, options, reporter)
}

/// Run the install pipeline on an opened bundle.
pub fn run_install(
    ctx: &Mutex<EngineContext>,
    mut bundle: Bundle,
    options: &InstallOptions,
    reporter: &ProgressReporter,
) -> Result<(), InstallError> {
    reporter.report(0, "Starting bundle installation", 0);

    if bundle.is_verified() {
        debug!("bundle signature already verified, skipping");
    } else {
        reporter.report(5, "Verifying bundle signature", 0);
        let candidates = trust_candidates(&lock(ctx), options);
        let trust = TrustStore::from_candidates(&candidates)?;
        bundle.verify_signature(&trust)?;
    }

    reporter.report(10, "Checking bundle compatibility", 0);
    let system_compatible = lock(ctx).compatible().to_string();
    bundle.check_compatible(&system_compatible)?;
    info!("compatibility check passed");

    reporter.report(15, "Verifying bundle content", 0);
    bundle.verify_content()?;
    info!("content verification passed");

    let (tasks, meta, data_dir, mount_prefix) = build_tasks(ctx, &bundle)?;
    let total = tasks.len();
    reporter.report(15, format!("Installing {total} image(s)"), 0);

    for (idx, task) in tasks.iter().enumerate() {
        // Copy progress lives in the 95..=100 range; each image gets
        // its share of the band so the stream stays non-decreasing
        // across images and checkpoints.
        let band_start = 95 + ((idx * 5) / total) as i32;
        let band_end = 95 + (((idx + 1) * 5) / total) as i32;
        if let Err(err) = install_image(
            ctx,
            task,
            &meta,
            &data_dir,
            &mount_prefix,
            options,
            (band_start, band_end - band_start),
            reporter,
        ) {
            mark_slot_bad(ctx, &task.slot, &data_dir);
            return Err(err);
        }

        reporter.report(
            band_end,
            format!("Installed {} of {} images", idx + 1, total),
            0,
        );
    }

    if options.auto_reboot {
        request_reboot();
    }

    reporter.report(100, "Installation completed successfully", 0);
    Ok(())
}

/// Resolve every manifest image to its target slot.
///
/// Target selection follows A/B policy through the context: the booted
/// slot is never a candidate.
fn build_tasks(
    ctx: &Mutex<EngineContext>,
    bundle: &Bundle,
) -> Result<(Vec<InstallTask>, BundleMeta, PathBuf, PathBuf), InstallError> {
    let guard = lock(ctx);
    let manifest = bundle.manifest()?;

    let mut tasks = Vec::new();
    for image in manifest.images.values() {
        let slot = guard.find_target_slot(&image.slot_class)?.clone();
        if slot.class != image.slot_class {
            return Err(InstallError::SlotClassMismatch {
                slot: slot.name.clone(),
                slot_class: slot.class.clone(),
                image_class: image.slot_class.clone(),
            });
        }

        let image_path = bundle.image_path(&image.slot_class)?;
        info!(
            image = %image.filename,
            slot = %slot.name,
            device = %slot.device,
            "install task created"
        );
        tasks.push(InstallTask {
            slot,
            image: image.clone(),
            image_path,
        });
    }

    let meta = BundleMeta {
        compatible: manifest.compatible.clone(),
        version: manifest.version.clone(),
        description: manifest.description.clone(),
        build: manifest.build.clone(),
    };

    Ok((
        tasks,
        meta,
        guard.data_directory().to_path_buf(),
        guard.mount_prefix().to_path_buf(),
    ))
}

fn trust_candidates(ctx: &EngineContext, options: &InstallOptions) -> Vec<PathBuf> {
    if let Some(candidates) = &options.trust_candidates {
        return candidates.clone();
    }

    let mut candidates = Vec::new();
    if let Some(path) = &ctx.config.keyring_path {
        candidates.push(path.clone());
    }
    if let Some(path) = &ctx.config.cert_path {
        candidates.push(path.clone());
    }
    candidates.extend(DEFAULT_CA_CANDIDATES.iter().map(PathBuf::from));
    candidates
}

/// Install one image into its slot: status to inactive, stream-copy
/// with fsync, status to good, then bootloader activation.
fn install_image(
    ctx: &Mutex<EngineContext>,
    task: &InstallTask,
    meta: &BundleMeta,
    data_dir: &Path,
    mount_prefix: &Path,
    options: &InstallOptions,
    band: (i32, i32),
    reporter: &ProgressReporter,
) -> Result<(), InstallError> {
    info!(
        image = %task.image.filename,
        slot = %task.slot.name,
        "installing image"
    );

    let mut status = SlotStatus::load(data_dir, &task.slot)?.unwrap_or_default();
    status.status = Some(SlotState::Inactive.as_str().to_string());
    status.save(data_dir, &task.slot)?;
    set_runtime_state(ctx, &task.slot.name, SlotState::Inactive);

    // Mountable slots are mounted for the duration of the write;
    // raw-type slots are written directly.
    let mount_guard = if task.slot.is_mountable() {
        Some(SlotMount::mount(&task.slot, mount_prefix)?)
    } else {
        None
    };

    let written = copy_image(&task.image_path, &task.slot, band, reporter)?;
    info!(slot = %task.slot.name, bytes = written, "image copy complete");

    drop(mount_guard);

    if options.verify_after_copy {
        verify_written_slot(task)?;
        info!(slot = %task.slot.name, "post-copy verification passed");
    }

    status.record_install(
        &meta.compatible,
        meta.version.as_deref(),
        meta.description.as_deref(),
        meta.build.as_deref(),
        task.image.checksum.clone(),
    );
    status.status = Some(SlotState::Good.as_str().to_string());
    status.save(data_dir, &task.slot)?;
    checksum_data_directory(data_dir, &task.slot, &task.image.checksum.digest)?;
    prune_data_directories(data_dir, &task.slot, Some(&task.image.checksum.digest));
    set_runtime_state(ctx, &task.slot.name, SlotState::Good);

    // Activation failures do not undo a completed copy; the install is
    // data-complete and activation alone can be retried.
    match activate_slot(ctx, &task.slot, options) {
        Ok(()) => {
            status.record_activation();
            if let Err(err) = status.save(data_dir, &task.slot) {
                warn!(slot = %task.slot.name, error = %err, "failed to persist activation record");
            }
        }
        Err(err) => {
            error!(
                slot = %task.slot.name,
                error = %err,
                "failed to mark slot active in bootloader; install remains data-complete"
            );
        }
    }

    Ok(())
}

/// Stream-copy the image into the slot device, reporting at ~10% copy
/// granularity scaled into `band` (start, span), and fsync before
/// declaring the copy complete.
fn copy_image(
    image_path: &Path,
    slot: &Slot,
    band: (i32, i32),
    reporter: &ProgressReporter,
) -> Result<u64, InstallError> {
    let mut src = File::open(image_path)?;
    let total = src.metadata()?.len();

    let mut dst = OpenOptions::new()
        .write(true)
        .open(&slot.device)
        .map_err(|source| InstallError::SlotWrite {
            device: slot.device.clone(),
            source,
        })?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut written: u64 = 0;
    let mut last_decile: i64 = -1;

    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .map_err(|source| InstallError::SlotWrite {
                device: slot.device.clone(),
                source,
            })?;
        written += n as u64;

        if total > 0 {
            let pct = ((written * 100) / total) as i64;
            let decile = pct / 10;
            if decile != last_decile {
                reporter.report(
                    band.0 + (pct as i32 * band.1) / 100,
                    format!("Installing to slot '{}': {pct}%", slot.name),
                    1,
                );
                last_decile = decile;
            }
        }
    }

    dst.sync_all().map_err(|source| InstallError::SlotWrite {
        device: slot.device.clone(),
        source,
    })?;

    Ok(written)
}

/// Re-read the written slot and verify size + digest against the
/// manifest checksum.
fn verify_written_slot(task: &InstallTask) -> Result<(), InstallError> {
    let expected = &task.image.checksum;
    let device = File::open(&task.slot.device)?;

    // A block device is usually larger than the image; only the image's
    // window participates in the digest.
    let computed = if expected.size > 0 {
        Checksum::of_reader(expected.algorithm, device.take(expected.size))
    } else {
        Checksum::of_reader(expected.algorithm, device)
    }
    .map_err(|source| InstallError::PostCopyVerification {
        slot: task.slot.name.clone(),
        source,
    })?;

    if computed.digest != expected.digest {
        return Err(InstallError::PostCopyVerification {
            slot: task.slot.name.clone(),
            source: slotup_common::ChecksumError::Mismatch {
                expected: expected.digest.clone(),
                actual: computed.digest,
            },
        });
    }

    Ok(())
}

fn activate_slot(
    ctx: &Mutex<EngineContext>,
    slot: &Slot,
    options: &InstallOptions,
) -> Result<(), InstallError> {
    let guard = lock(ctx);
    let chooser = match &options.bootloader_tool {
        Some(tool) => Bootchooser::with_tool(&guard, tool)?,
        None => Bootchooser::from_context(&guard)?,
    };
    drop(guard);

    chooser.mark_active(slot)?;
    Ok(())
}

/// Record a failed install on the slot. Best effort; the original
/// error is what the caller reports.
fn mark_slot_bad(ctx: &Mutex<EngineContext>, slot: &Slot, data_dir: &Path) {
    let mut status = match SlotStatus::load(data_dir, slot) {
        Ok(status) => status.unwrap_or_default(),
        Err(err) => {
            warn!(slot = %slot.name, error = %err, "could not load status while marking bad");
            SlotStatus::default()
        }
    };
    status.status = Some(SlotState::Bad.as_str().to_string());
    if let Err(err) = status.save(data_dir, slot) {
        warn!(slot = %slot.name, error = %err, "could not persist bad status");
    }
    set_runtime_state(ctx, &slot.name, SlotState::Bad);
}

fn set_runtime_state(ctx: &Mutex<EngineContext>, slot_name: &str, state: SlotState) {
    if let Some(slot) = lock(ctx).slot_mut(slot_name) {
        slot.state = state;
    }
}

/// Ask the init system for a reboot. Failures are logged; the install
/// already succeeded.
fn request_reboot() {
    info!("initiating system reboot");
    match run_tool("systemctl", ["reboot"]) {
        Ok(_) => info!("system reboot requested"),
        Err(err) => error!(error = %err, "reboot request failed"),
    }
}

/// A mounted slot; unmounted on drop.
struct SlotMount {
    mountpoint: PathBuf,
}

impl SlotMount {
    fn mount(slot: &Slot, mount_prefix: &Path) -> Result<Self, InstallError> {
        let mountpoint = mount_prefix.join(&slot.name);
        std::fs::create_dir_all(&mountpoint)?;

        run_tool(
            "mount",
            [std::ffi::OsStr::new(&slot.device), mountpoint.as_os_str()],
        )
        .map_err(|source| InstallError::SlotMount {
            slot: slot.name.clone(),
            source,
        })?;

        debug!(slot = %slot.name, mountpoint = %mountpoint.display(), "slot mounted");
        Ok(Self { mountpoint })
    }
}

impl Drop for SlotMount {
    fn drop(&mut self) {
        match run_tool("umount", [self.mountpoint.as_os_str()]) {
            Ok(_) => debug!(mountpoint = %self.mountpoint.display(), "slot unmounted"),
            Err(err) => {
                warn!(mountpoint = %self.mountpoint.display(), error = %err, "failed to unmount slot")
            }
        }
    }
}
