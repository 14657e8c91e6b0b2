//! Bundle manifest: the metadata file declaring what a bundle installs.
//!
//! `manifest.raucm` is a keyfile with one `[update]` section for bundle
//! identity and one `[image.<slotclass>]` section per image. Parsed
//! once per bundle, immutable thereafter.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use slotup_common::{Checksum, ChecksumAlgorithm, KeyFile};
use tracing::debug;

use crate::error::{BundleError, Result};

/// Name of the manifest file inside the mounted bundle.
pub const MANIFEST_FILENAME: &str = "manifest.raucm";

const UPDATE_GROUP: &str = "update";
const IMAGE_GROUP_PREFIX: &str = "image.";

/// Checksum keys recognized in image sections, in preference order.
const CHECKSUM_KEYS: &[(&str, ChecksumAlgorithm)] = &[
    ("sha256", ChecksumAlgorithm::Sha256),
    ("sha1", ChecksumAlgorithm::Sha1),
    ("md5", ChecksumAlgorithm::Md5),
];

/// One image a bundle carries for a slot class.
#[derive(Debug, Clone)]
pub struct Image {
    pub slot_class: String,
    /// File name relative to the bundle root.
    pub filename: String,
    pub checksum: Checksum,
    pub size: u64,
    pub variant: Option<String>,
    pub hooks: Option<String>,
}

/// Parsed bundle manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub compatible: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub build: Option<String>,
    /// Images keyed by slot class; exactly one per class.
    pub images: BTreeMap<String, Image>,
}

impl Manifest {
    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let doc = KeyFile::parse(text)?;

        if !doc.has_group(UPDATE_GROUP) {
            return Err(BundleError::ManifestMissingUpdateSection);
        }
        let compatible = doc
            .get_string(UPDATE_GROUP, "compatible")
            .ok_or_else(|| BundleError::ManifestMissingKey {
                section: UPDATE_GROUP.to_string(),
                key: "compatible".to_string(),
            })?;

        let mut images = BTreeMap::new();
        for group in doc.groups() {
            let Some(class_from_name) = group.strip_prefix(IMAGE_GROUP_PREFIX) else {
                continue;
            };

            let image = parse_image(&doc, group, class_from_name)?;
            if images.contains_key(&image.slot_class) {
                return Err(BundleError::DuplicateImageClass(image.slot_class));
            }
            debug!(
                class = %image.slot_class,
                filename = %image.filename,
                checksum = %image.checksum,
                "parsed manifest image"
            );
            images.insert(image.slot_class.clone(), image);
        }

        if images.is_empty() {
            return Err(BundleError::NoImages);
        }

        Ok(Manifest {
            compatible,
            version: doc.get_string(UPDATE_GROUP, "version"),
            description: doc.get_string(UPDATE_GROUP, "description"),
            build: doc.get_string(UPDATE_GROUP, "build"),
            images,
        })
    }

    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BundleError::MissingManifest(path.to_path_buf()));
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// The image for a slot class, if the bundle carries one.
    pub fn image(&self, slot_class: &str) -> Option<&Image> {
        self.images.get(slot_class)
    }

    /// Slot classes this bundle installs, in sorted order.
    pub fn slot_classes(&self) -> Vec<&str> {
        self.images.keys().map(String::as_str).collect()
    }
}

fn parse_image(doc: &KeyFile, group: &str, class_from_name: &str) -> Result<Image> {
    let filename =
        doc.get_string(group, "filename")
            .ok_or_else(|| BundleError::ManifestMissingKey {
                section: group.to_string(),
                key: "filename".to_string(),
            })?;

    // The section name carries the class unless an explicit key
    // overrides it.
    let slot_class = doc
        .get_string(group, "slotclass")
        .unwrap_or_else(|| class_from_name.to_string());

    let size = doc.get_u64(group, "size")?.unwrap_or(0);

    let mut checksum = None;
    for (key, algorithm) in CHECKSUM_KEYS {
        if let Some(digest) = doc.get(group, key) {
            // Validate hex through the canonical string form.
            let parsed = Checksum::from_str(&format!("{}:{digest}", algorithm.as_str())).map_err(
                |source| BundleError::ImageChecksum {
                    filename: filename.clone(),
                    source,
                },
            )?;
            checksum = Some(Checksum::new(*algorithm, parsed.digest, size));
            break;
        }
    }
    let checksum = checksum.ok_or_else(|| BundleError::ImageMissingChecksum(filename.clone()))?;

    Ok(Image {
        slot_class,
        filename,
        checksum,
        size,
        variant: doc.get_string(group, "variant"),
        hooks: doc.get_string(group, "hooks"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[update]
compatible=demo-v1
version=2024.08
description=Demo rootfs update
build=42

[image.rootfs]
filename=rootfs.ext4
sha256=b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c
size=1048576
";

    #[test]
    fn parses_update_section_and_image() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.compatible, "demo-v1");
        assert_eq!(manifest.version.as_deref(), Some("2024.08"));
        assert_eq!(manifest.build.as_deref(), Some("42"));
        assert_eq!(manifest.slot_classes(), ["rootfs"]);

        let image = manifest.image("rootfs").unwrap();
        assert_eq!(image.filename, "rootfs.ext4");
        assert_eq!(image.checksum.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(image.size, 1048576);
        assert_eq!(image.checksum.size, 1048576);
    }

    #[test]
    fn class_inferred_from_section_name() {
        let manifest = Manifest::parse(
            "[update]\ncompatible=x\n\n[image.appfs]\nfilename=app.img\nmd5=d41d8cd98f00b204e9800998ecf8427e\n",
        )
        .unwrap();
        assert!(manifest.image("appfs").is_some());
    }

    #[test]
    fn explicit_slotclass_overrides_section_name() {
        let manifest = Manifest::parse(
            "[update]\ncompatible=x\n\n[image.whatever]\nfilename=a.img\nslotclass=rootfs\nsha1=da39a3ee5e6b4b0d3255bfef95601890afd80709\n",
        )
        .unwrap();
        assert!(manifest.image("rootfs").is_some());
        assert!(manifest.image("whatever").is_none());
    }

    #[test]
    fn checksum_preference_is_sha256_first() {
        let manifest = Manifest::parse(
            "[update]\ncompatible=x\n\n[image.rootfs]\nfilename=a.img\n\
             md5=d41d8cd98f00b204e9800998ecf8427e\n\
             sha256=e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n",
        )
        .unwrap();
        assert_eq!(
            manifest.image("rootfs").unwrap().checksum.algorithm,
            ChecksumAlgorithm::Sha256
        );
    }

    #[test]
    fn missing_update_section_rejected() {
        let err = Manifest::parse("[image.rootfs]\nfilename=a\nsha256=00\n").unwrap_err();
        assert!(matches!(err, BundleError::ManifestMissingUpdateSection));
    }

    #[test]
    fn missing_compatible_rejected() {
        let err = Manifest::parse("[update]\nversion=1\n\n[image.rootfs]\nfilename=a\n").unwrap_err();
        assert!(matches!(
            err,
            BundleError::ManifestMissingKey { key, .. } if key == "compatible"
        ));
    }

    #[test]
    fn missing_filename_rejected() {
        let err = Manifest::parse(
            "[update]\ncompatible=x\n\n[image.rootfs]\nsha256=e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BundleError::ManifestMissingKey { key, .. } if key == "filename"
        ));
    }

    #[test]
    fn missing_checksum_rejected() {
        let err = Manifest::parse("[update]\ncompatible=x\n\n[image.rootfs]\nfilename=a.img\n")
            .unwrap_err();
        assert!(matches!(err, BundleError::ImageMissingChecksum(f) if f == "a.img"));
    }

    #[test]
    fn invalid_digest_rejected() {
        let err = Manifest::parse(
            "[update]\ncompatible=x\n\n[image.rootfs]\nfilename=a.img\nsha256=not-hex\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn zero_images_rejected() {
        let err = Manifest::parse("[update]\ncompatible=x\n").unwrap_err();
        assert!(matches!(err, BundleError::NoImages));
    }

    #[test]
    fn duplicate_class_rejected() {
        let err = Manifest::parse(
            "[update]\ncompatible=x\n\n\
             [image.a]\nfilename=1.img\nslotclass=rootfs\nsha1=da39a3ee5e6b4b0d3255bfef95601890afd80709\n\n\
             [image.b]\nfilename=2.img\nslotclass=rootfs\nsha1=da39a3ee5e6b4b0d3255bfef95601890afd80709\n",
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateImageClass(c) if c == "rootfs"));
    }

    #[test]
    fn parse_is_idempotent() {
        let once = Manifest::parse(SAMPLE).unwrap();
        let twice = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(once.compatible, twice.compatible);
        assert_eq!(once.images.len(), twice.images.len());
        assert_eq!(
            once.image("rootfs").unwrap().checksum,
            twice.image("rootfs").unwrap().checksum
        );
    }
}
