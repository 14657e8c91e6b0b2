//! The slot model: one addressable, bootable partition or device.
//!
//! Slots are grouped into classes (the text before the first `.` of the
//! slot name, so `rootfs.0` and `rootfs.1` form class `rootfs`). Parent
//! relations are name-based lookups into the flat slot table, never
//! links; the graph shape is fixed once configuration is loaded.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Filesystem and device types a slot may declare.
pub const VALID_SLOT_TYPES: &[&str] = &[
    "ext2",
    "ext3",
    "ext4",
    "btrfs",
    "squashfs",
    "ubifs",
    "jffs2",
    "raw",
    "nand",
    "nor",
    "boot-emmc",
    "boot-gpt-switch",
    "boot-mbr-switch",
    "boot-raw-fallback",
];

/// Runtime state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    #[default]
    Unknown,
    Inactive,
    Active,
    Booted,
    Good,
    Bad,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Unknown => "unknown",
            SlotState::Inactive => "inactive",
            SlotState::Active => "active",
            SlotState::Booted => "booted",
            SlotState::Good => "good",
            SlotState::Bad => "bad",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => SlotState::Inactive,
            "active" => SlotState::Active,
            "booted" => SlotState::Booted,
            "good" => SlotState::Good,
            "bad" => SlotState::Bad,
            _ => SlotState::Unknown,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured slot.
#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    /// Unique slot name, e.g. `rootfs.0`.
    pub name: String,
    /// Slot class, derived from the name prefix.
    pub class: String,
    /// Block device backing the slot.
    pub device: String,
    /// Filesystem/device type, validated against `VALID_SLOT_TYPES`.
    pub fs_type: String,
    pub description: Option<String>,
    /// Name the bootloader knows this slot by.
    pub bootname: Option<String>,
    /// Parent slot name; resolved and cycle-checked at load time.
    pub parent: Option<String>,
    pub extra_mount_opts: Option<String>,
    pub readonly: bool,
    pub allow_mounted: bool,
    pub install_same: bool,
    pub resize: bool,
    pub region_start: u64,
    pub region_size: u64,
    /// Runtime state, maintained by the engine after load.
    pub state: SlotState,
    /// Where the slot is currently mounted, if anywhere.
    #[serde(skip)]
    pub mount_point: Option<PathBuf>,
    /// Subdirectory of the data directory holding this slot's status.
    pub data_directory: String,
}

impl Slot {
    /// Create a slot with defaults for everything but name and device.
    pub fn new(name: &str, device: &str) -> Self {
        Self {
            name: name.to_string(),
            class: class_of(name).to_string(),
            device: device.to_string(),
            fs_type: "ext4".to_string(),
            description: None,
            bootname: None,
            parent: None,
            extra_mount_opts: None,
            readonly: false,
            allow_mounted: false,
            install_same: false,
            resize: false,
            region_start: 0,
            region_size: 0,
            state: SlotState::Unknown,
            mount_point: None,
            data_directory: name.to_string(),
        }
    }

    /// Whether the slot's type supports mounting a filesystem.
    pub fn is_mountable(&self) -> bool {
        !(self.fs_type == "raw"
            || self.fs_type.starts_with("boot-")
            || self.fs_type.starts_with("nand")
            || self.fs_type.starts_with("nor"))
    }
}

/// The class portion of a slot name: everything before the first `.`.
pub fn class_of(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_from_name() {
        assert_eq!(class_of("rootfs.0"), "rootfs");
        assert_eq!(class_of("rootfs.1"), "rootfs");
        assert_eq!(class_of("appfs"), "appfs");
    }

    #[test]
    fn defaults() {
        let slot = Slot::new("rootfs.0", "/dev/sda2");
        assert_eq!(slot.class, "rootfs");
        assert_eq!(slot.fs_type, "ext4");
        assert_eq!(slot.state, SlotState::Unknown);
        assert_eq!(slot.data_directory, "rootfs.0");
        assert!(slot.is_mountable());
    }

    #[test]
    fn mountability_by_type() {
        let mut slot = Slot::new("boot.0", "/dev/sda1");
        for fs_type in ["raw", "nand", "nor", "boot-emmc", "boot-gpt-switch"] {
            slot.fs_type = fs_type.to_string();
            assert!(!slot.is_mountable(), "{fs_type} should not be mountable");
        }
        for fs_type in ["ext4", "btrfs", "squashfs"] {
            slot.fs_type = fs_type.to_string();
            assert!(slot.is_mountable(), "{fs_type} should be mountable");
        }
    }

    #[test]
    fn state_string_roundtrip() {
        for state in [
            SlotState::Unknown,
            SlotState::Inactive,
            SlotState::Active,
            SlotState::Booted,
            SlotState::Good,
            SlotState::Bad,
        ] {
            assert_eq!(SlotState::parse(state.as_str()), state);
        }
        assert_eq!(SlotState::parse("bogus"), SlotState::Unknown);
    }
}
