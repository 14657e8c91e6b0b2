//! Persisted per-slot status.
//!
//! Each slot keeps a keyfile at `<data-dir>/<slot-subdir>/status`
//! recording which bundle is installed, its payload checksum, and
//! install/activation bookkeeping. Payload-specific state lives beside
//! it in `hash-<digest>` directories so several historical digests can
//! coexist; stale ones are pruned once the active digest changes.

use std::path::{Path, PathBuf};

use chrono::Utc;
use slotup_common::{Checksum, ChecksumAlgorithm, KeyFile};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::slot::Slot;

const STATUS_GROUP: &str = "slot";
const STATUS_FILE: &str = "status";
const HASH_DIR_PREFIX: &str = "hash-";

/// Persisted metadata for one slot.
#[derive(Debug, Clone, Default)]
pub struct SlotStatus {
    pub bundle_compatible: Option<String>,
    pub bundle_version: Option<String>,
    pub bundle_description: Option<String>,
    pub bundle_build: Option<String>,
    /// Textual slot health as last persisted (`inactive`, `good`, `bad`).
    pub status: Option<String>,
    /// Checksum of the installed payload.
    pub checksum: Option<Checksum>,
    /// Transaction id of the last install.
    pub installed_txn: Option<String>,
    pub installed_timestamp: Option<String>,
    pub installed_count: u32,
    pub activated_timestamp: Option<String>,
    pub activated_count: u32,
}

impl SlotStatus {
    /// Path of a slot's status file under the data directory.
    pub fn path(data_dir: &Path, slot: &Slot) -> PathBuf {
        data_dir.join(&slot.data_directory).join(STATUS_FILE)
    }

    /// Load a slot's persisted status. A missing file is not an error;
    /// it just means the slot has never been written to.
    pub fn load(data_dir: &Path, slot: &Slot) -> Result<Option<Self>> {
        let path = Self::path(data_dir, slot);
        if !path.exists() {
            debug!(slot = %slot.name, "no status file");
            return Ok(None);
        }

        let doc = KeyFile::load(&path)?;
        let mut status = SlotStatus {
            bundle_compatible: doc.get_string(STATUS_GROUP, "bundle.compatible"),
            bundle_version: doc.get_string(STATUS_GROUP, "bundle.version"),
            bundle_description: doc.get_string(STATUS_GROUP, "bundle.description"),
            bundle_build: doc.get_string(STATUS_GROUP, "bundle.build"),
            status: doc.get_string(STATUS_GROUP, "status"),
            checksum: None,
            installed_txn: doc.get_string(STATUS_GROUP, "installed.transaction"),
            installed_timestamp: doc.get_string(STATUS_GROUP, "installed.timestamp"),
            installed_count: doc.get_u64(STATUS_GROUP, "installed.count")?.unwrap_or(0) as u32,
            activated_timestamp: doc.get_string(STATUS_GROUP, "activated.timestamp"),
            activated_count: doc.get_u64(STATUS_GROUP, "activated.count")?.unwrap_or(0) as u32,
        };

        if let Some(digest) = doc.get(STATUS_GROUP, "sha256") {
            status.checksum = Some(Checksum::new(
                ChecksumAlgorithm::Sha256,
                digest.to_ascii_lowercase(),
                doc.get_u64(STATUS_GROUP, "size")?.unwrap_or(0),
            ));
        }

        debug!(slot = %slot.name, "loaded slot status");
        Ok(Some(status))
    }

    /// Persist the status, creating the slot's data directory as needed.
    pub fn save(&self, data_dir: &Path, slot: &Slot) -> Result<()> {
        let slot_dir = data_dir.join(&slot.data_directory);
        std::fs::create_dir_all(&slot_dir)?;

        let mut doc = KeyFile::new();
        let optional = [
            ("bundle.compatible", &self.bundle_compatible),
            ("bundle.version", &self.bundle_version),
            ("bundle.description", &self.bundle_description),
            ("bundle.build", &self.bundle_build),
            ("status", &self.status),
            ("installed.transaction", &self.installed_txn),
            ("installed.timestamp", &self.installed_timestamp),
            ("activated.timestamp", &self.activated_timestamp),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                doc.set(STATUS_GROUP, key, v.clone());
            }
        }
        doc.set(
            STATUS_GROUP,
            "installed.count",
            self.installed_count.to_string(),
        );
        doc.set(
            STATUS_GROUP,
            "activated.count",
            self.activated_count.to_string(),
        );
        if let Some(checksum) = &self.checksum {
            doc.set(STATUS_GROUP, "sha256", checksum.digest.clone());
            if checksum.size > 0 {
                doc.set(STATUS_GROUP, "size", checksum.size.to_string());
            }
        }

        doc.save(&slot_dir.join(STATUS_FILE))?;
        debug!(slot = %slot.name, "saved slot status");
        Ok(())
    }

    /// Record a fresh install of a bundle payload: bundle identity,
    /// payload checksum, a new transaction id, timestamp and counter.
    pub fn record_install(
        &mut self,
        compatible: &str,
        version: Option<&str>,
        description: Option<&str>,
        build: Option<&str>,
        checksum: Checksum,
    ) {
        self.bundle_compatible = Some(compatible.to_string());
        self.bundle_version = version.map(str::to_string);
        self.bundle_description = description.map(str::to_string);
        self.bundle_build = build.map(str::to_string);
        self.checksum = Some(checksum);
        self.installed_txn = Some(Uuid::new_v4().to_string());
        self.installed_timestamp = Some(Utc::now().to_rfc3339());
        self.installed_count += 1;
    }

    /// Record a successful activation in the bootloader.
    pub fn record_activation(&mut self) {
        self.activated_timestamp = Some(Utc::now().to_rfc3339());
        self.activated_count += 1;
    }
}

/// Directory for payload-specific state of the given digest, created on
/// first use: `<data-dir>/<slot-subdir>/hash-<digest>`.
pub fn checksum_data_directory(data_dir: &Path, slot: &Slot, digest: &str) -> Result<PathBuf> {
    let dir = data_dir
        .join(&slot.data_directory)
        .join(format!("{HASH_DIR_PREFIX}{digest}"));
    if !dir.is_dir() {
        std::fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "created payload data directory");
    }
    Ok(dir)
}

/// Remove `hash-*` directories for digests other than `keep_digest`.
///
/// Removal failures are logged and skipped; pruning must never turn a
/// successful install into a failure.
pub fn prune_data_directories(data_dir: &Path, slot: &Slot, keep_digest: Option<&str>) {
    let slot_dir = data_dir.join(&slot.data_directory);
    let entries = match std::fs::read_dir(&slot_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(digest) = name.strip_prefix(HASH_DIR_PREFIX) else {
            continue;
        };
        if keep_digest == Some(digest) {
            continue;
        }
        if let Err(err) = std::fs::remove_dir_all(entry.path()) {
            warn!(path = %entry.path().display(), error = %err, "failed to prune payload directory");
        } else {
            debug!(path = %entry.path().display(), "pruned obsolete payload directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotup_common::ChecksumAlgorithm;

    fn slot() -> Slot {
        Slot::new("rootfs.0", "/dev/sda2")
    }

    #[test]
    fn absent_status_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SlotStatus::load(dir.path(), &slot()).unwrap().is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot();

        let mut status = SlotStatus::default();
        status.record_install(
            "demo-v1",
            Some("1.2.3"),
            Some("demo image"),
            Some("build-7"),
            Checksum::new(ChecksumAlgorithm::Sha256, "ab".repeat(32), 1024),
        );
        status.status = Some("good".to_string());
        status.record_activation();
        status.save(dir.path(), &slot).unwrap();

        let loaded = SlotStatus::load(dir.path(), &slot).unwrap().unwrap();
        assert_eq!(loaded.bundle_compatible.as_deref(), Some("demo-v1"));
        assert_eq!(loaded.bundle_version.as_deref(), Some("1.2.3"));
        assert_eq!(loaded.bundle_build.as_deref(), Some("build-7"));
        assert_eq!(loaded.status.as_deref(), Some("good"));
        assert_eq!(loaded.installed_count, 1);
        assert_eq!(loaded.activated_count, 1);
        assert!(loaded.installed_txn.is_some());
        let checksum = loaded.checksum.unwrap();
        assert_eq!(checksum.digest, "ab".repeat(32));
        assert_eq!(checksum.size, 1024);
    }

    #[test]
    fn counters_accumulate_across_installs() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot();

        let mut status = SlotStatus::default();
        for version in ["1.0", "2.0"] {
            status.record_install(
                "demo-v1",
                Some(version),
                None,
                None,
                Checksum::new(ChecksumAlgorithm::Sha256, "cd".repeat(32), 0),
            );
            status.save(dir.path(), &slot).unwrap();
            status = SlotStatus::load(dir.path(), &slot).unwrap().unwrap();
        }

        assert_eq!(status.installed_count, 2);
        assert_eq!(status.bundle_version.as_deref(), Some("2.0"));
    }

    #[test]
    fn payload_directories_pruned_except_active() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot();

        let old = checksum_data_directory(dir.path(), &slot, "olddigest").unwrap();
        let current = checksum_data_directory(dir.path(), &slot, "newdigest").unwrap();
        std::fs::write(old.join("marker"), b"x").unwrap();

        prune_data_directories(dir.path(), &slot, Some("newdigest"));

        assert!(!old.exists());
        assert!(current.exists());
    }

    #[test]
    fn prune_without_keep_removes_all() {
        let dir = tempfile::tempdir().unwrap();
        let slot = slot();

        let a = checksum_data_directory(dir.path(), &slot, "a").unwrap();
        let b = checksum_data_directory(dir.path(), &slot, "b").unwrap();

        prune_data_directories(dir.path(), &slot, None);

        assert!(!a.exists());
        assert!(!b.exists());
    }
}
