//! slotup - A/B field updates for dual-partitioned devices.
//!
//! The binary wraps the [`UpdateEngine`] for operators and scripts:
//! install a bundle into the inactive slot, inspect bundles and slot
//! state, and adjust bootloader health marks. stdout carries command
//! payloads; logs and progress go to stderr.

use std::path::PathBuf;
use std::sync::mpsc;

use clap::{Args, Parser, Subcommand};
use slotup_core::logging::init_logging;
use slotup_core::{InstallOptions, InstallResult, ProgressEvent, UpdateEngine};

/// slotup - install signed firmware bundles into the inactive slot
#[derive(Parser)]
#[command(name = "slotup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the system configuration
    #[arg(
        long,
        global = true,
        env = "SLOTUP_CONFIG",
        default_value = slotup_config::DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a bundle and install it into the inactive slot
    Install(InstallArgs),

    /// Show a bundle's manifest summary without installing
    Info(InfoArgs),

    /// Show slot states and installed bundles
    Status(StatusArgs),

    /// Mark a slot healthy in the bootloader
    MarkGood {
        /// Slot name, e.g. rootfs.0
        slot: String,
    },

    /// Mark a slot unhealthy in the bootloader
    MarkBad {
        /// Slot name, e.g. rootfs.0
        slot: String,
    },

    /// Print the current primary boot slot
    Primary,
}

#[derive(Args, Debug)]
struct InstallArgs {
    /// Path to the bundle file
    bundle: PathBuf,

    /// Reboot after a successful install
    #[arg(long)]
    reboot: bool,

    /// Re-read the written slot and verify its digest after the copy
    #[arg(long)]
    verify_after_copy: bool,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Path to the bundle file
    bundle: PathBuf,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Emit machine-readable JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let exit_code = match &cli.command {
        Commands::Install(args) => run_install(&cli.global, args),
        Commands::Info(args) => run_info(&cli.global, args),
        Commands::Status(args) => run_status(&cli.global, args),
        Commands::MarkGood { slot } => run_mark(&cli.global, slot, true),
        Commands::MarkBad { slot } => run_mark(&cli.global, slot, false),
        Commands::Primary => run_primary(&cli.global),
    };

    std::process::exit(exit_code);
}

fn initialized_engine(global: &GlobalOpts) -> Result<UpdateEngine, i32> {
    let engine = UpdateEngine::new();
    if let Err(err) = engine.initialize(&global.config) {
        eprintln!("slotup: {err}");
        return Err(1);
    }
    Ok(engine)
}

fn run_install(global: &GlobalOpts, args: &InstallArgs) -> i32 {
    let engine = match initialized_engine(global) {
        Ok(engine) => engine,
        Err(code) => return code,
    };

    let options = InstallOptions {
        verify_after_copy: args.verify_after_copy,
        auto_reboot: args.reboot,
        ..Default::default()
    };

    let on_progress = Box::new(|event: &ProgressEvent| {
        let indent = "  ".repeat(event.depth as usize);
        eprintln!("{indent}[{:3}%] {}", event.percentage, event.message);
    });

    let (done_tx, done_rx) = mpsc::channel();
    let on_complete = Box::new(move |result: &InstallResult| {
        let _ = done_tx.send(result.clone());
    });

    if let Err(err) = engine.install(&args.bundle, options, Some(on_progress), Some(on_complete)) {
        eprintln!("slotup: {err}");
        return 1;
    }
    engine.wait();

    match done_rx.recv() {
        Ok(result) if result.success => {
            println!("{}", result.message);
            0
        }
        Ok(result) => {
            eprintln!("slotup: {}", result.message);
            1
        }
        Err(_) => {
            eprintln!("slotup: install worker exited without reporting a result");
            1
        }
    }
}

fn run_info(global: &GlobalOpts, args: &InfoArgs) -> i32 {
    let engine = match initialized_engine(global) {
        Ok(engine) => engine,
        Err(code) => return code,
    };

    match engine.get_bundle_info(&args.bundle) {
        Ok(info) => {
            println!("compatible:  {}", info.compatible);
            println!("version:     {}", info.version.as_deref().unwrap_or("-"));
            println!(
                "description: {}",
                info.description.as_deref().unwrap_or("-")
            );
            println!("build:       {}", info.build.as_deref().unwrap_or("-"));
            for (class, filename, checksum) in &info.images {
                println!("image [{class}]: {filename} ({checksum})");
            }
            0
        }
        Err(err) => {
            eprintln!("slotup: {err}");
            1
        }
    }
}

fn run_status(global: &GlobalOpts, args: &StatusArgs) -> i32 {
    let engine = match initialized_engine(global) {
        Ok(engine) => engine,
        Err(code) => return code,
    };

    let slots = match engine.get_slot_status() {
        Ok(slots) => slots,
        Err(err) => {
            eprintln!("slotup: {err}");
            return 1;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&slots) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("slotup: {err}");
                return 1;
            }
        }
        return 0;
    }

    for slot in &slots {
        let booted = if slot.booted { " (booted)" } else { "" };
        println!("{} [{}] {}{booted}", slot.name, slot.fs_type, slot.device);
        println!("  state:     {}", slot.state);
        if let Some(bootname) = &slot.bootname {
            println!("  bootname:  {bootname}");
        }
        if let Some(version) = &slot.bundle_version {
            println!(
                "  installed: {} {} ({} installs)",
                slot.bundle_compatible.as_deref().unwrap_or("-"),
                version,
                slot.installed_count
            );
        }
    }
    0
}

fn run_mark(global: &GlobalOpts, slot: &str, good: bool) -> i32 {
    let engine = match initialized_engine(global) {
        Ok(engine) => engine,
        Err(code) => return code,
    };

    match engine.mark_slot(slot, good, None) {
        Ok(()) => {
            println!("marked slot '{slot}' {}", if good { "good" } else { "bad" });
            0
        }
        Err(err) => {
            eprintln!("slotup: {err}");
            1
        }
    }
}

fn run_primary(global: &GlobalOpts) -> i32 {
    let engine = match initialized_engine(global) {
        Ok(engine) => engine,
        Err(code) => return code,
    };

    match engine.get_primary(None) {
        Ok(name) => {
            println!("{name}");
            0
        }
        Err(err) => {
            eprintln!("slotup: {err}");
            1
        }
    }
}
