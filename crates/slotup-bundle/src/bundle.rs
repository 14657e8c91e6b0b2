//! Opening and verifying bundles.
//!
//! A [`Bundle`] owns the loop mount of its container for as long as it
//! lives; dropping the bundle releases the mount on every exit path.
//! Verification is layered: the signature covers the container's
//! content window (or embeds the manifest), the compatible string gates
//! installation, and per-image checksums guard the extracted files
//! independently of the signature.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use slotup_signature::{TrustStore, VerifiedSignature};
use tracing::{debug, info};

use crate::error::{BundleError, Result};
use crate::manifest::{Manifest, MANIFEST_FILENAME};
use crate::mount::LoopMount;
use crate::trailer::read_trailer;

/// An opened bundle: mounted container, extracted signature block and
/// lazily loaded manifest.
#[derive(Debug)]
pub struct Bundle {
    path: PathBuf,
    mount: LoopMount,
    content_size: u64,
    signature: Vec<u8>,
    manifest: Option<Manifest>,
    verified: bool,
}

impl Bundle {
    /// Open a bundle: validate the trailer, mount the container
    /// read-only and check its structure.
    ///
    /// The mount is torn down if any later step fails.
    pub fn open(path: &Path, mount_prefix: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BundleError::NotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(BundleError::NotRegularFile(path.to_path_buf()));
        }

        let mut file = File::open(path)?;
        let trailer = read_trailer(&mut file)?;

        let mount = LoopMount::mount(path, mount_prefix)?;

        let manifest_path = mount.mountpoint().join(MANIFEST_FILENAME);
        if !manifest_path.is_file() {
            return Err(BundleError::MissingManifest(manifest_path));
        }

        info!(
            path = %path.display(),
            content_size = trailer.content_size,
            sig_size = trailer.signature.len(),
            "bundle opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            mount,
            content_size: trailer.content_size,
            signature: trailer.signature,
            manifest: None,
            verified: false,
        })
    }

    /// Construct a bundle over an existing directory instead of a real
    /// loop mount. Fixture-only.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_parts(
        path: &Path,
        mounted_dir: &Path,
        signature: Vec<u8>,
        content_size: u64,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            mount: LoopMount::adopt(mounted_dir),
            content_size,
            signature,
            manifest: None,
            verified: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mount_point(&self) -> &Path {
        self.mount.mountpoint()
    }

    /// Payload bytes preceding the signature block.
    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// Whether `verify_signature` has succeeded on this bundle.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Load the manifest from the mounted container. Parsed once and
    /// cached; later calls return the same data.
    pub fn load_manifest(&mut self) -> Result<&Manifest> {
        if self.manifest.is_none() {
            let manifest = Manifest::load(&self.mount.mountpoint().join(MANIFEST_FILENAME))?;
            debug!(
                compatible = %manifest.compatible,
                images = manifest.images.len(),
                "manifest loaded"
            );
            self.manifest = Some(manifest);
        }
        Ok(self.manifest.as_ref().expect("just loaded"))
    }

    /// The manifest, if already loaded.
    pub fn manifest(&self) -> Result<&Manifest> {
        self.manifest.as_ref().ok_or(BundleError::ManifestNotLoaded)
    }

    /// Verify the bundle's signature against a trust store.
    ///
    /// Detached signatures are checked against the content window of
    /// the container file; inline signatures embed the manifest bytes
    /// and need no external content.
    pub fn verify_signature(&mut self, trust: &TrustStore) -> Result<VerifiedSignature> {
        let detached = slotup_signature::is_detached(&self.signature)?;

        let verified = if detached {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(0))?;
            let mut content = vec![0u8; self.content_size as usize];
            file.read_exact(&mut content)?;
            slotup_signature::verify(Some(&content), &self.signature, trust)?
        } else {
            slotup_signature::verify(None, &self.signature, trust)?
        };

        info!(signer = %verified.signer_subject, "bundle signature verified");
        self.verified = true;
        Ok(verified)
    }

    /// Check the manifest's compatible string against the system's.
    pub fn check_compatible(&mut self, system_compatible: &str) -> Result<()> {
        let manifest = self.load_manifest()?;
        if manifest.compatible != system_compatible {
            return Err(BundleError::Incompatible {
                bundle: manifest.compatible.clone(),
                system: system_compatible.to_string(),
            });
        }
        Ok(())
    }

    /// Verify every image file exists and matches its manifest
    /// checksum.
    ///
    /// This is a second, independent integrity check beyond signature
    /// verification: it guards each extracted file against tampering.
    pub fn verify_content(&mut self) -> Result<()> {
        self.load_manifest()?;
        let mountpoint = self.mount.mountpoint().to_path_buf();
        let manifest = self.manifest.as_ref().expect("just loaded");

        for image in manifest.images.values() {
            let image_path = mountpoint.join(&image.filename);
            if !image_path.exists() {
                return Err(BundleError::MissingImage(image_path));
            }

            image
                .checksum
                .verify_file(&image_path)
                .map_err(|source| BundleError::ImageChecksum {
                    filename: image.filename.clone(),
                    source,
                })?;
            debug!(filename = %image.filename, "image content verified");
        }

        Ok(())
    }

    /// Absolute path of the image file for a slot class.
    pub fn image_path(&self, slot_class: &str) -> Result<PathBuf> {
        let manifest = self.manifest()?;
        let image = manifest
            .image(slot_class)
            .ok_or_else(|| BundleError::NoImageForClass(slot_class.to_string()))?;
        Ok(self.mount.mountpoint().join(&image.filename))
    }
}

/// Read-only summary of a bundle's identity and contents.
#[derive(Debug, Clone)]
pub struct BundleInfo {
    pub compatible: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub build: Option<String>,
    /// `(slot class, filename, checksum string)` per image.
    pub images: Vec<(String, String, String)>,
}

impl Bundle {
    /// Summarize the bundle without installing anything.
    pub fn info(&mut self) -> Result<BundleInfo> {
        let manifest = self.load_manifest()?;
        Ok(BundleInfo {
            compatible: manifest.compatible.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            build: manifest.build.clone(),
            images: manifest
                .images
                .values()
                .map(|i| {
                    (
                        i.slot_class.clone(),
                        i.filename.clone(),
                        i.checksum.to_string(),
                    )
                })
                .collect(),
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit {
    //! Bundle fixtures for tests: a payload directory standing in for
    //! the mounted container plus a container file with a real signed
    //! trailer.

    use std::path::{Path, PathBuf};

    use slotup_common::{Checksum, ChecksumAlgorithm};

    use super::Bundle;
    use crate::trailer::append_signature;

    /// Description of a fixture bundle to build.
    pub struct FixtureBundle {
        pub compatible: String,
        pub version: String,
        pub payload: Vec<u8>,
        pub slot_class: String,
    }

    impl Default for FixtureBundle {
        fn default() -> Self {
            Self {
                compatible: "demo-v1".to_string(),
                version: "1.0".to_string(),
                payload: vec![0x55u8; 1024],
                slot_class: "rootfs".to_string(),
            }
        }
    }

    /// Materialize the fixture: writes the "mounted" directory (image +
    /// manifest) and a container file whose trailer carries a detached
    /// signature over the content window, then opens it via
    /// [`Bundle::from_parts`].
    ///
    /// Returns the bundle plus the paths backing it so tests can tamper
    /// with them.
    pub fn build(
        fixture: &FixtureBundle,
        dir: &Path,
        sign: impl FnOnce(&[u8]) -> Vec<u8>,
    ) -> (Bundle, PathBuf, PathBuf) {
        let mounted = dir.join("mounted");
        std::fs::create_dir_all(&mounted).unwrap();

        let image_name = format!("{}.ext4", fixture.slot_class);
        std::fs::write(mounted.join(&image_name), &fixture.payload).unwrap();

        let checksum = Checksum::of_bytes(ChecksumAlgorithm::Sha256, &fixture.payload);
        let manifest = format!(
            "[update]\ncompatible={}\nversion={}\n\n[image.{}]\nfilename={}\nsha256={}\nsize={}\n",
            fixture.compatible,
            fixture.version,
            fixture.slot_class,
            image_name,
            checksum.digest,
            fixture.payload.len(),
        );
        std::fs::write(mounted.join("manifest.raucm"), &manifest).unwrap();

        // Container: payload image ++ signature ++ length trailer. The
        // fixture signs the content window like a real detached bundle.
        let mut container = fixture.payload.clone();
        let signature = sign(&container);
        append_signature(&mut container, &signature);

        let container_path = dir.join("bundle.raucb");
        std::fs::write(&container_path, &container).unwrap();

        let content_size = fixture.payload.len() as u64;
        let bundle = Bundle::from_parts(&container_path, &mounted, signature, content_size);
        (bundle, container_path, mounted)
    }
}
