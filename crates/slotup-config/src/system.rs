//! System configuration: `system.conf` parsing and validation.
//!
//! The configuration describes the device: its compatible string, the
//! bootloader in charge, filesystem locations, and one `[slot.<name>]`
//! section per installable slot. Parent references are resolved after
//! all slots are parsed and the resulting graph is checked for cycles
//! with a bounded-depth walk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use slotup_common::KeyFile;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::slot::{class_of, Slot, VALID_SLOT_TYPES};

/// Bootloaders a configuration may name.
pub const VALID_BOOTLOADERS: &[&str] = &["grub", "uboot", "barebox", "efi", "custom"];

/// Default location of the system configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/slotup/system.conf";

const SLOT_SECTION_PREFIX: &str = "slot.";
const MAX_PARENT_DEPTH: usize = 10;

/// Parsed and validated system configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Identifier a bundle must match exactly before installation.
    pub compatible: String,
    /// Configured bootloader kind, if any.
    pub bootloader: Option<String>,
    /// Path of the GRUB environment block.
    pub grubenv_path: Option<PathBuf>,
    /// Root of persisted slot state.
    pub data_directory: PathBuf,
    /// Prefix under which slots are mounted during installs.
    pub mount_prefix: PathBuf,
    /// CA keyring for bundle signature verification.
    pub keyring_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    /// The configured slot catalog, keyed by slot name.
    pub slots: BTreeMap<String, Slot>,
}

impl SystemConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        debug!(path = %path.display(), "loading system configuration");
        let doc = KeyFile::load(path)?;

        if !doc.has_group("system") {
            return Err(ConfigError::MissingSection("system".to_string()));
        }

        let compatible =
            doc.get_string("system", "compatible")
                .ok_or_else(|| ConfigError::MissingKey {
                    section: "system".to_string(),
                    key: "compatible".to_string(),
                })?;

        let bootloader = doc.get_string("system", "bootloader");
        if let Some(bl) = &bootloader {
            if !VALID_BOOTLOADERS.contains(&bl.as_str()) {
                return Err(ConfigError::InvalidBootloader(bl.clone()));
            }
        }

        let config = SystemConfig {
            compatible,
            bootloader,
            grubenv_path: doc.get_string("system", "grubenv").map(PathBuf::from),
            data_directory: doc
                .get_string("system", "data-directory")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data")),
            mount_prefix: doc
                .get_string("system", "mount-prefix")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/slotup")),
            keyring_path: doc.get_string("keyring", "path").map(PathBuf::from),
            cert_path: doc.get_string("keyring", "cert-path").map(PathBuf::from),
            slots: parse_slots(&doc)?,
        };

        resolve_parents(&config.slots)?;
        config.validate()?;

        info!(
            path = %path.display(),
            compatible = %config.compatible,
            slots = config.slots.len(),
            "system configuration loaded"
        );
        Ok(config)
    }

    /// Structural validation beyond per-key parsing.
    pub fn validate(&self) -> Result<()> {
        if self.compatible.is_empty() {
            return Err(ConfigError::MissingKey {
                section: "system".to_string(),
                key: "compatible".to_string(),
            });
        }

        if let Some(bl) = &self.bootloader {
            if !VALID_BOOTLOADERS.contains(&bl.as_str()) {
                return Err(ConfigError::InvalidBootloader(bl.clone()));
            }
        }

        if self.slots.is_empty() {
            return Err(ConfigError::NoSlots);
        }

        if self.root_classes().is_empty() {
            return Err(ConfigError::NoRootClass);
        }

        Ok(())
    }

    /// Classes that have at least one parentless slot.
    pub fn root_classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self
            .slots
            .values()
            .filter(|s| s.parent.is_none())
            .map(|s| s.class.as_str())
            .collect();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    /// All slots of a class, in name order.
    pub fn slots_of_class(&self, class: &str) -> Vec<&Slot> {
        self.slots.values().filter(|s| s.class == class).collect()
    }
}

fn parse_slots(doc: &KeyFile) -> Result<BTreeMap<String, Slot>> {
    let mut slots = BTreeMap::new();

    for group in doc.groups() {
        let Some(name) = group.strip_prefix(SLOT_SECTION_PREFIX) else {
            continue;
        };
        if name.is_empty() {
            return Err(ConfigError::EmptySlotName(group.to_string()));
        }

        let device = doc
            .get_string(group, "device")
            .ok_or_else(|| ConfigError::MissingKey {
                section: group.to_string(),
                key: "device".to_string(),
            })?;

        let mut slot = Slot::new(name, &device);

        if let Some(fs_type) = doc.get_string(group, "type") {
            if !VALID_SLOT_TYPES.contains(&fs_type.as_str()) {
                return Err(ConfigError::InvalidSlotType {
                    slot: name.to_string(),
                    value: fs_type,
                });
            }
            slot.fs_type = fs_type;
        }

        slot.description = doc.get_string(group, "description");
        slot.bootname = doc.get_string(group, "bootname");
        slot.parent = doc.get_string(group, "parent");
        slot.extra_mount_opts = doc.get_string(group, "extra-mount-opts");
        slot.readonly = doc.get_bool(group, "readonly")?.unwrap_or(false);
        slot.allow_mounted = doc.get_bool(group, "allow-mounted")?.unwrap_or(false);
        slot.install_same = doc.get_bool(group, "install-same")?.unwrap_or(false);
        slot.resize = doc.get_bool(group, "resize")?.unwrap_or(false);
        slot.region_start = doc.get_u64(group, "region-start")?.unwrap_or(0);
        slot.region_size = doc.get_u64(group, "region-size")?.unwrap_or(0);

        debug!(
            slot = %slot.name,
            device = %slot.device,
            class = %slot.class,
            fs_type = %slot.fs_type,
            "parsed slot"
        );
        slots.insert(name.to_string(), slot);
    }

    Ok(slots)
}

/// Check every parent reference resolves and no parent chain loops.
fn resolve_parents(slots: &BTreeMap<String, Slot>) -> Result<()> {
    for slot in slots.values() {
        let Some(parent_name) = &slot.parent else {
            continue;
        };
        if !slots.contains_key(parent_name) {
            return Err(ConfigError::UnknownParent {
                slot: slot.name.clone(),
                parent: parent_name.clone(),
            });
        }
    }

    for slot in slots.values() {
        let mut current = slot.parent.as_deref();
        let mut depth = 0;

        while let Some(name) = current {
            if name == slot.name {
                return Err(ConfigError::ParentCycle(slot.name.clone()));
            }
            depth += 1;
            if depth >= MAX_PARENT_DEPTH {
                return Err(ConfigError::ParentChainTooDeep(slot.name.clone()));
            }
            current = slots.get(name).and_then(|s| s.parent.as_deref());
        }
    }

    Ok(())
}

/// The class a slot name belongs to; re-exported here because config
/// consumers often hold only names.
pub fn slot_class(name: &str) -> &str {
    class_of(name)
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit {
    //! Config fixtures shared by slotup's own tests and downstream
    //! integration tests.

    use std::path::Path;

    /// A minimal two-slot A/B configuration, parameterized over the
    /// slot type and the paths that vary per test.
    pub fn ab_config(
        compatible: &str,
        slot_type: &str,
        device_a: &str,
        device_b: &str,
        data_dir: &Path,
        mount_prefix: &Path,
        grubenv: &Path,
    ) -> String {
        format!(
            "[system]\n\
             compatible={compatible}\n\
             bootloader=grub\n\
             grubenv={grubenv}\n\
             data-directory={data}\n\
             mount-prefix={mount}\n\
             \n\
             [slot.rootfs.0]\n\
             device={device_a}\n\
             type={slot_type}\n\
             bootname=A\n\
             \n\
             [slot.rootfs.1]\n\
             device={device_b}\n\
             type={slot_type}\n\
             bootname=B\n",
            data = data_dir.display(),
            mount = mount_prefix.display(),
            grubenv = grubenv.display(),
        )
    }
}
