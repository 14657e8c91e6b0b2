//! End-to-end install runs over file-backed slot devices.
//!
//! The fixtures avoid everything that needs privileges: slot devices
//! are plain files declared `type=raw` (so no slot mount happens), the
//! bundle is pre-opened over a directory standing in for the loop
//! mount, and a shell script stands in for `grub-editenv`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use slotup_bundle::testkit::{build, FixtureBundle};
use slotup_common::{Checksum, ChecksumAlgorithm};
use slotup_config::{Slot, SlotStatus};
use slotup_core::{
    EngineError, InstallOptions, InstallResult, ProgressEvent, UpdateEngine,
};
use slotup_signature::testkit as sig;

/// `grub-editenv`-compatible stand-in supporting `<file> list` and
/// `<file> set k=v...`.
const STUB_SCRIPT: &str = r#"#!/bin/sh
file="$1"
cmd="$2"
shift 2
case "$cmd" in
    list)
        cat "$file" 2>/dev/null
        ;;
    set)
        touch "$file"
        for kv in "$@"; do
            key="${kv%%=*}"
            grep -v "^${key}=" "$file" > "$file.tmp" 2>/dev/null || true
            echo "$kv" >> "$file.tmp"
            mv "$file.tmp" "$file"
        done
        ;;
    *)
        echo "unknown command: $cmd" >&2
        exit 1
        ;;
esac
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    engine: UpdateEngine,
    options: InstallOptions,
    payload: Vec<u8>,
    device_b: PathBuf,
    data_dir: PathBuf,
    grubenv: PathBuf,
    grub_tool: PathBuf,
    cert: openssl::x509::X509,
    key: openssl::pkey::PKey<openssl::pkey::Private>,
    bundle_dir: PathBuf,
}

impl Fixture {
    /// Two raw rootfs slots backed by zero-filled files, slot A booted.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0x55u8; 1024];

        let device_a = dir.path().join("dev-a.img");
        let device_b = dir.path().join("dev-b.img");
        std::fs::write(&device_a, vec![0u8; payload.len()]).unwrap();
        std::fs::write(&device_b, vec![0u8; payload.len()]).unwrap();

        let grub_tool = dir.path().join("grub-editenv-stub");
        std::fs::write(&grub_tool, STUB_SCRIPT).unwrap();
        let mut perms = std::fs::metadata(&grub_tool).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&grub_tool, perms).unwrap();

        let grubenv = dir.path().join("grubenv");
        let data_dir = dir.path().join("data");
        let mount_prefix = dir.path().join("mnt");

        // Raw slots keep the copy path off the real mount(8) seam.
        let config_path = dir.path().join("system.conf");
        std::fs::write(
            &config_path,
            slotup_config::system::testkit::ab_config(
                "demo-v1",
                "raw",
                &device_a.to_string_lossy(),
                &device_b.to_string_lossy(),
                &data_dir,
                &mount_prefix,
                &grubenv,
            ),
        )
        .unwrap();

        let (cert, key) = sig::generate_keypair("e2e-signer");
        let ca_path = dir.path().join("ca.cert.pem");
        sig::write_ca_pem(&cert, &ca_path);

        let engine = UpdateEngine::new();
        engine
            .initialize_with_cmdline(&config_path, &format!("root={} ro", device_a.display()))
            .unwrap();

        let options = InstallOptions {
            trust_candidates: Some(vec![ca_path]),
            bootloader_tool: Some(grub_tool.clone()),
            ..Default::default()
        };

        let bundle_dir = dir.path().join("bundle");
        std::fs::create_dir_all(&bundle_dir).unwrap();

        Fixture {
            _dir: dir,
            engine,
            options,
            payload,
            device_b,
            data_dir,
            grubenv,
            grub_tool,
            cert,
            key,
            bundle_dir,
        }
    }

    fn bundle(&self, compatible: &str) -> slotup_bundle::Bundle {
        let fixture = FixtureBundle {
            compatible: compatible.to_string(),
            version: "1.0".to_string(),
            payload: self.payload.clone(),
            slot_class: "rootfs".to_string(),
        };
        let (bundle, _, _) = build(&fixture, &self.bundle_dir, |content| {
            sig::sign_detached(&self.cert, &self.key, content)
        });
        bundle
    }

    /// Run an install to completion, collecting progress and the
    /// terminal result.
    fn install(
        &self,
        bundle: slotup_bundle::Bundle,
        options: InstallOptions,
    ) -> (Vec<ProgressEvent>, InstallResult) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_sink = events.clone();
        let (done_tx, done_rx) = mpsc::channel();

        self.engine
            .install_opened_bundle(
                bundle,
                options,
                Some(Box::new(move |event: &ProgressEvent| {
                    events_sink.lock().unwrap().push(event.clone());
                })),
                Some(Box::new(move |result: &InstallResult| {
                    let _ = done_tx.send(result.clone());
                })),
            )
            .unwrap();
        self.engine.wait();

        let result = done_rx.recv().expect("completion callback fired");
        let events = events.lock().unwrap().clone();
        (events, result)
    }

    fn target_status(&self) -> Option<SlotStatus> {
        let slot = Slot::new("rootfs.1", &self.device_b.to_string_lossy());
        SlotStatus::load(&self.data_dir, &slot).unwrap()
    }

    fn grubenv_contents(&self) -> String {
        std::fs::read_to_string(&self.grubenv).unwrap_or_default()
    }
}

#[test]
fn full_install_succeeds_and_flips_boot_order() {
    let fx = Fixture::new();
    let (events, result) = fx.install(fx.bundle("demo-v1"), fx.options.clone());

    assert!(result.success, "install failed: {}", result.message);
    assert!(!fx.engine.is_installing());
    assert!(fx.engine.get_last_error().is_none());

    // The payload landed in the inactive slot, never the booted one.
    assert_eq!(std::fs::read(&fx.device_b).unwrap(), fx.payload);

    // Persisted status carries the manifest identity and both counters.
    let status = fx.target_status().expect("status file written");
    assert_eq!(status.status.as_deref(), Some("good"));
    assert_eq!(status.bundle_compatible.as_deref(), Some("demo-v1"));
    assert_eq!(status.bundle_version.as_deref(), Some("1.0"));
    assert_eq!(status.installed_count, 1);
    assert_eq!(status.activated_count, 1);
    let expected = Checksum::of_bytes(ChecksumAlgorithm::Sha256, &fx.payload);
    assert_eq!(status.checksum.unwrap().digest, expected.digest);

    // Payload data directory for the active digest exists.
    assert!(fx
        .data_dir
        .join("rootfs.1")
        .join(format!("hash-{}", expected.digest))
        .is_dir());

    // Bootloader: new slot leads the order and is marked good.
    let env = fx.grubenv_contents();
    assert!(env.contains("ORDER=B A"), "env was: {env}");
    assert!(env.contains("B_OK=1"));
    assert!(env.contains("B_TRY=0"));
    assert_eq!(
        fx.engine.get_primary(Some(&fx.grub_tool)).unwrap(),
        "rootfs.1"
    );

    // Progress: starts at 0, ends at 100, non-decreasing across the
    // whole stream regardless of nesting depth.
    assert_eq!(events.first().unwrap().percentage, 0);
    assert_eq!(events.last().unwrap().percentage, 100);
    let mut last = -1;
    for event in &events {
        assert!(
            event.percentage >= last,
            "progress went backwards: {events:?}"
        );
        last = event.percentage;
    }

    let slots = fx.engine.get_slot_status().unwrap();
    let target = slots.iter().find(|s| s.name == "rootfs.1").unwrap();
    assert_eq!(target.state, "good");
    assert_eq!(target.bundle_version.as_deref(), Some("1.0"));
}

#[test]
fn incompatible_bundle_fails_before_any_copy() {
    let fx = Fixture::new();
    let (_, result) = fx.install(fx.bundle("other-v2"), fx.options.clone());

    assert!(!result.success);
    assert!(
        result.message.contains("other-v2") && result.message.contains("demo-v1"),
        "unexpected message: {}",
        result.message
    );
    assert_eq!(fx.engine.get_last_error().as_deref(), Some(result.message.as_str()));

    // Nothing was copied and no status was written.
    assert_eq!(
        std::fs::read(&fx.device_b).unwrap(),
        vec![0u8; fx.payload.len()]
    );
    assert!(fx.target_status().is_none());
    assert!(fx.grubenv_contents().is_empty());
}

#[test]
fn untrusted_signature_aborts_install() {
    let fx = Fixture::new();

    // Signed by a keypair the configured trust store does not know.
    let (rogue_cert, rogue_key) = sig::generate_keypair("rogue-signer");
    let fixture = FixtureBundle {
        payload: fx.payload.clone(),
        ..Default::default()
    };
    let (bundle, _, _) = build(&fixture, &fx.bundle_dir, |content| {
        sig::sign_detached(&rogue_cert, &rogue_key, content)
    });

    let (_, result) = fx.install(bundle, fx.options.clone());
    assert!(!result.success);
    assert_eq!(
        std::fs::read(&fx.device_b).unwrap(),
        vec![0u8; fx.payload.len()]
    );
}

#[test]
fn failed_copy_marks_slot_bad() {
    let fx = Fixture::new();
    std::fs::remove_file(&fx.device_b).unwrap();

    let (_, result) = fx.install(fx.bundle("demo-v1"), fx.options.clone());

    assert!(!result.success);
    let status = fx.target_status().expect("bad status persisted");
    assert_eq!(status.status.as_deref(), Some("bad"));
    assert_eq!(status.installed_count, 0);

    let slots = fx.engine.get_slot_status().unwrap();
    let target = slots.iter().find(|s| s.name == "rootfs.1").unwrap();
    assert_eq!(target.state, "bad");
}

#[test]
fn activation_failure_leaves_install_data_complete() {
    let fx = Fixture::new();
    let options = InstallOptions {
        bootloader_tool: Some(PathBuf::from("/nonexistent/grub-editenv")),
        ..fx.options.clone()
    };

    let (_, result) = fx.install(fx.bundle("demo-v1"), options);

    // The copy itself succeeded; only the bootloader write failed.
    assert!(result.success, "install failed: {}", result.message);
    assert_eq!(std::fs::read(&fx.device_b).unwrap(), fx.payload);

    let status = fx.target_status().unwrap();
    assert_eq!(status.status.as_deref(), Some("good"));
    assert_eq!(status.installed_count, 1);
    assert_eq!(status.activated_count, 0);
    assert!(fx.grubenv_contents().is_empty());
}

#[test]
fn post_copy_verification_passes_on_clean_install() {
    let fx = Fixture::new();
    let options = InstallOptions {
        verify_after_copy: true,
        ..fx.options.clone()
    };

    let (_, result) = fx.install(fx.bundle("demo-v1"), options);
    assert!(result.success, "install failed: {}", result.message);
    assert_eq!(std::fs::read(&fx.device_b).unwrap(), fx.payload);
}

#[test]
fn second_install_while_running_is_rejected() {
    let fx = Fixture::new();

    // The progress callback parks on a channel, pinning the first
    // install's worker until released.
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (done_tx, done_rx) = mpsc::channel();

    fx.engine
        .install_opened_bundle(
            fx.bundle("demo-v1"),
            fx.options.clone(),
            Some(Box::new(move |_: &ProgressEvent| {
                let _ = release_rx.lock().unwrap().recv();
            })),
            Some(Box::new(move |result: &InstallResult| {
                let _ = done_tx.send(result.clone());
            })),
        )
        .unwrap();

    assert!(fx.engine.is_installing());
    let err = fx
        .engine
        .install(
            Path::new("/nonexistent/bundle.raucb"),
            fx.options.clone(),
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InstallInProgress));

    drop(release_tx);
    fx.engine.wait();
    let result = done_rx.recv().unwrap();
    assert!(result.success, "install failed: {}", result.message);
    assert!(!fx.engine.is_installing());
}
