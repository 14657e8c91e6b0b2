//! Bootchooser: persistent boot-order and slot-health state.
//!
//! The bootloader decides which slot to start from a small set of
//! environment variables: `ORDER` (space-separated bootnames, priority
//! first), and per slot `<bootname>_OK` / `<bootname>_TRY`. This crate
//! reads and writes them through the bootloader's own environment
//! editor so the on-disk encoding stays the tool's business, and keeps
//! the transition rules in one place:
//!
//! - a slot is *good* only if its bootname appears in `ORDER`, `_OK=1`
//!   and `_TRY=0`
//! - making a slot primary rewrites `ORDER` with it first and marks it
//!   good in the same invocation
//!
//! Only the GRUB backend exists; any other configured bootloader is an
//! explicit unsupported-bootloader error, never a fallback.

mod error;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use slotup_common::run_tool;
use slotup_config::{EngineContext, Slot};
use tracing::{debug, info};

pub use error::{BootError, Result};

/// The environment editor the GRUB backend drives.
pub const GRUB_EDITENV: &str = "grub-editenv";

const ORDER_KEY: &str = "ORDER";

/// Low-level access to the GRUB environment block.
#[derive(Debug, Clone)]
pub struct GrubEnv {
    tool: PathBuf,
    env_path: PathBuf,
}

impl GrubEnv {
    pub fn new(env_path: &Path) -> Self {
        Self {
            tool: PathBuf::from(GRUB_EDITENV),
            env_path: env_path.to_path_buf(),
        }
    }

    /// Use a different editor executable. Tests point this at a
    /// scripted stand-in.
    pub fn with_tool(tool: &Path, env_path: &Path) -> Self {
        Self {
            tool: tool.to_path_buf(),
            env_path: env_path.to_path_buf(),
        }
    }

    /// Read one variable; absent keys yield an empty string.
    pub fn get(&self, key: &str) -> Result<String> {
        let output = run_tool(
            &self.tool,
            [self.env_path.as_os_str(), std::ffi::OsStr::new("list")],
        )?;

        for line in output.stdout.lines() {
            if let Some((k, v)) = line.split_once('=') {
                if k == key {
                    return Ok(v.to_string());
                }
            }
        }
        Ok(String::new())
    }

    /// Write one or more variables in a single editor invocation.
    pub fn set(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut args: Vec<OsString> = vec![self.env_path.clone().into(), "set".into()];
        for (key, value) in pairs {
            args.push(format!("{key}={value}").into());
        }

        run_tool(&self.tool, args)?;
        debug!(pairs = ?pairs, "bootloader environment updated");
        Ok(())
    }
}

/// Boot-order and slot-health operations over the configured
/// bootloader.
#[derive(Debug)]
pub struct Bootchooser {
    env: GrubEnv,
    /// Slots that carry a bootname, cloned from the context in name
    /// order.
    slots: Vec<Slot>,
}

impl Bootchooser {
    /// Build a bootchooser for the context's bootloader.
    pub fn from_context(ctx: &EngineContext) -> Result<Self> {
        Self::with_tool(ctx, Path::new(GRUB_EDITENV))
    }

    /// Like [`Bootchooser::from_context`] with an explicit editor
    /// executable.
    pub fn with_tool(ctx: &EngineContext, tool: &Path) -> Result<Self> {
        match ctx.bootloader() {
            Some("grub") => {}
            Some(other) => return Err(BootError::UnsupportedBootloader(other.to_string())),
            None => return Err(BootError::NoBootloaderConfigured),
        }

        let env_path = ctx.grubenv_path().ok_or(BootError::NoGrubEnvPath)?;
        let slots = ctx
            .system_slots
            .values()
            .filter(|s| s.bootname.is_some())
            .cloned()
            .collect();

        Ok(Self {
            env: GrubEnv::with_tool(tool, env_path),
            slots,
        })
    }

    fn bootname<'s>(&self, slot: &'s Slot) -> Result<&'s str> {
        slot.bootname
            .as_deref()
            .ok_or_else(|| BootError::NoBootname(slot.name.clone()))
    }

    fn slot_by_bootname(&self, bootname: &str) -> Option<&Slot> {
        self.slots
            .iter()
            .find(|s| s.bootname.as_deref() == Some(bootname))
    }

    /// Boot order with `slot` first and the remaining configured
    /// bootnames after it in their configured order.
    fn order_with_primary(&self, primary: &str) -> String {
        let mut order = vec![primary.to_string()];
        for slot in &self.slots {
            if let Some(bn) = &slot.bootname {
                if bn != primary {
                    order.push(bn.clone());
                }
            }
        }
        order.join(" ")
    }

    /// Make `slot` the primary boot target and mark it healthy, in one
    /// environment write.
    pub fn set_primary(&self, slot: &Slot) -> Result<()> {
        let bootname = self.bootname(slot)?;
        let order = self.order_with_primary(bootname);

        self.env.set(&[
            (format!("{bootname}_OK"), "1".to_string()),
            (format!("{bootname}_TRY"), "0".to_string()),
            (ORDER_KEY.to_string(), order.clone()),
        ])?;

        info!(slot = %slot.name, order = %order, "set primary boot slot");
        Ok(())
    }

    /// Mark a slot good (`_OK=1,_TRY=0`) or bad (`_OK=0,_TRY=0`).
    pub fn set_state(&self, slot: &Slot, good: bool) -> Result<()> {
        let bootname = self.bootname(slot)?;
        let ok = if good { "1" } else { "0" };

        self.env.set(&[
            (format!("{bootname}_OK"), ok.to_string()),
            (format!("{bootname}_TRY"), "0".to_string()),
        ])?;

        info!(slot = %slot.name, good, "set slot boot state");
        Ok(())
    }

    /// A slot is good only if its bootname is in `ORDER`, `_OK=1` and
    /// `_TRY=0`.
    pub fn get_state(&self, slot: &Slot) -> Result<bool> {
        let bootname = self.bootname(slot)?;

        let order = self.env.get(ORDER_KEY)?;
        if !order.split_whitespace().any(|bn| bn == bootname) {
            return Ok(false);
        }

        let ok = self.env.get(&format!("{bootname}_OK"))?;
        let try_ = self.env.get(&format!("{bootname}_TRY"))?;

        Ok(ok.trim() == "1" && try_.trim() == "0")
    }

    /// Walk `ORDER` left to right and return the first good slot.
    pub fn get_primary(&self) -> Result<&Slot> {
        let order = self.env.get(ORDER_KEY)?;
        if order.trim().is_empty() {
            return Err(BootError::EmptyBootOrder);
        }

        for bootname in order.split_whitespace() {
            let Some(slot) = self.slot_by_bootname(bootname) else {
                debug!(bootname, "boot order names unconfigured slot");
                continue;
            };
            if self.get_state(slot)? {
                return Ok(slot);
            }
        }

        Err(BootError::NoGoodSlot)
    }

    /// Activate a freshly written slot: order it first, then mark it
    /// good. The orchestrator calls only this; the ordering step is
    /// never skipped.
    pub fn mark_active(&self, slot: &Slot) -> Result<()> {
        self.set_primary(slot)?;
        self.set_state(slot, true)?;
        info!(slot = %slot.name, "slot marked active in bootloader");
        Ok(())
    }
}
