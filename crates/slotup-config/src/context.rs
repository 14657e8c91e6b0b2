//! Process-wide engine context.
//!
//! The context owns the loaded configuration and two slot tables: the
//! *configured* catalog exactly as parsed, and the *system* table of
//! mutable runtime copies whose states change during an install. It is
//! created explicitly at startup and passed to every component; only
//! configuration loading and the install orchestrator mutate it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::slot::{Slot, SlotState};
use crate::system::SystemConfig;

/// Process-wide engine state.
#[derive(Debug)]
pub struct EngineContext {
    /// Where the configuration was loaded from.
    pub config_path: PathBuf,
    /// The parsed configuration, including the configured slot catalog.
    pub config: SystemConfig,
    /// Mutable runtime slot table used during installs.
    pub system_slots: BTreeMap<String, Slot>,
    /// Set once loading and state discovery completed.
    pub initialized: bool,
}

impl EngineContext {
    /// Load configuration and discover runtime slot states from the
    /// running kernel's command line.
    pub fn load(config_path: &Path) -> Result<Self> {
        let cmdline = std::fs::read_to_string("/proc/cmdline").unwrap_or_default();
        Self::load_with_cmdline(config_path, &cmdline)
    }

    /// Like [`EngineContext::load`], with the kernel command line
    /// supplied by the caller. The seam tests use.
    pub fn load_with_cmdline(config_path: &Path, cmdline: &str) -> Result<Self> {
        let config = SystemConfig::load(config_path)?;
        let mut system_slots = config.slots.clone();
        mark_booted_slot(&mut system_slots, cmdline);

        info!(
            config = %config_path.display(),
            slots = system_slots.len(),
            "engine context initialized"
        );

        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            system_slots,
            initialized: true,
        })
    }

    /// The system's compatible string.
    pub fn compatible(&self) -> &str {
        &self.config.compatible
    }

    /// The configured bootloader kind, if any.
    pub fn bootloader(&self) -> Option<&str> {
        self.config.bootloader.as_deref()
    }

    pub fn data_directory(&self) -> &Path {
        &self.config.data_directory
    }

    pub fn mount_prefix(&self) -> &Path {
        &self.config.mount_prefix
    }

    pub fn grubenv_path(&self) -> Option<&Path> {
        self.config.grubenv_path.as_deref()
    }

    /// Runtime slot lookup by name.
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.system_slots.get(name)
    }

    /// Mutable runtime slot lookup; reserved for the orchestrator's
    /// status updates.
    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.system_slots.get_mut(name)
    }

    /// Runtime slots of a class, in name order.
    pub fn slots_of_class(&self, class: &str) -> Vec<&Slot> {
        self.system_slots
            .values()
            .filter(|s| s.class == class)
            .collect()
    }

    /// The currently booted slot, if the kernel command line matched one.
    pub fn booted_slot(&self) -> Option<&Slot> {
        self.system_slots
            .values()
            .find(|s| s.state == SlotState::Booted)
    }

    /// Pick the install target for a slot class.
    ///
    /// A/B policy: never the booted slot. Among the remaining slots of
    /// the class the first by name wins, which alternates naturally on
    /// an A/B pair as the booted side flips.
    pub fn find_target_slot(&self, class: &str) -> Result<&Slot> {
        let candidates = self.slots_of_class(class);
        if candidates.is_empty() {
            return Err(ConfigError::NoTargetSlot(class.to_string()));
        }

        candidates
            .into_iter()
            .find(|s| s.state != SlotState::Booted)
            .ok_or_else(|| ConfigError::NoTargetSlot(class.to_string()))
    }
}

/// Mark the slot whose device backs the running system as booted, and
/// its class siblings as inactive.
fn mark_booted_slot(slots: &mut BTreeMap<String, Slot>, cmdline: &str) {
    let Some(root) = root_device(cmdline) else {
        debug!("no root= entry in kernel command line");
        return;
    };

    let booted_name = slots
        .values()
        .find(|s| s.device == root)
        .map(|s| s.name.clone());

    let Some(booted_name) = booted_name else {
        debug!(root = %root, "root device does not match any configured slot");
        return;
    };

    let booted_class = slots[&booted_name].class.clone();
    for slot in slots.values_mut() {
        if slot.name == booted_name {
            slot.state = SlotState::Booted;
        } else if slot.class == booted_class {
            slot.state = SlotState::Inactive;
        }
    }
    debug!(slot = %booted_name, root = %root, "identified booted slot");
}

/// Extract the `root=` value from a kernel command line.
fn root_device(cmdline: &str) -> Option<String> {
    cmdline
        .split_whitespace()
        .find_map(|token| token.strip_prefix("root="))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn context_for(cmdline: &str) -> (tempfile::TempDir, EngineContext) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(
            b"[system]\n\
              compatible=demo-v1\n\
              bootloader=grub\n\
              grubenv=/boot/grub/grubenv\n\
              \n\
              [slot.rootfs.0]\n\
              device=/dev/sda2\n\
              bootname=A\n\
              \n\
              [slot.rootfs.1]\n\
              device=/dev/sda3\n\
              bootname=B\n",
        )
        .unwrap();
        let ctx = EngineContext::load_with_cmdline(&path, cmdline).unwrap();
        (dir, ctx)
    }

    #[test]
    fn root_device_parsing() {
        assert_eq!(
            root_device("ro quiet root=/dev/sda2 console=ttyS0"),
            Some("/dev/sda2".to_string())
        );
        assert_eq!(root_device("ro quiet"), None);
    }

    #[test]
    fn booted_slot_identified() {
        let (_dir, ctx) = context_for("root=/dev/sda2 ro");
        assert_eq!(ctx.booted_slot().unwrap().name, "rootfs.0");
        assert_eq!(ctx.slot("rootfs.1").unwrap().state, SlotState::Inactive);
    }

    #[test]
    fn target_is_never_the_booted_slot() {
        let (_dir, ctx) = context_for("root=/dev/sda2 ro");
        assert_eq!(ctx.find_target_slot("rootfs").unwrap().name, "rootfs.1");

        let (_dir, ctx) = context_for("root=/dev/sda3 ro");
        assert_eq!(ctx.find_target_slot("rootfs").unwrap().name, "rootfs.0");
    }

    #[test]
    fn unknown_class_has_no_target() {
        let (_dir, ctx) = context_for("root=/dev/sda2");
        assert!(matches!(
            ctx.find_target_slot("appfs"),
            Err(ConfigError::NoTargetSlot(_))
        ));
    }

    #[test]
    fn unmatched_cmdline_leaves_states_unknown() {
        let (_dir, ctx) = context_for("root=/dev/mmcblk0p7");
        assert!(ctx.booted_slot().is_none());
        // With no booted slot every class member is a candidate; the
        // first by name is chosen deterministically.
        assert_eq!(ctx.find_target_slot("rootfs").unwrap().name, "rootfs.0");
    }

    #[test]
    fn accessors() {
        let (_dir, ctx) = context_for("root=/dev/sda2");
        assert_eq!(ctx.compatible(), "demo-v1");
        assert_eq!(ctx.bootloader(), Some("grub"));
        assert!(ctx.initialized);
        assert_eq!(ctx.slots_of_class("rootfs").len(), 2);
    }
}
