mod backup;
mod catalogue;
mod error;
mod fingerprint;
mod inject;
mod inline;
mod install;
mod manifest;
mod marker;
mod matcher;
mod util;
mod window;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::catalogue::PatchCatalogue;
use crate::install::InstallLayout;
use crate::matcher::{Detection, MatchResult, PatchOptions, Verdict};

#[derive(Parser)]
#[command(
    name = "addon-installer",
    about = "Patch the client binary and inject an addon into its UI",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    install: InstallArgs,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct InstallArgs {
    /// Path to the addon directory
    #[arg(default_value = "myinstants-soundboard")]
    addon_dir: PathBuf,

    #[command(flatten)]
    target: TargetArgs,

    /// Report partially patched binaries instead of completing them
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Path to the client installation
    #[arg(long, default_value = "/opt/teamspeak")]
    ts_dir: PathBuf,

    /// Path to the patch catalogue (patches.json)
    #[arg(long, default_value = "/tmp/patches.json")]
    patches: PathBuf,

    /// Catalogue platform key (defaults to the running OS)
    #[arg(long)]
    platform: Option<String>,
}

impl TargetArgs {
    fn platform(&self) -> String {
        self.platform
            .clone()
            .unwrap_or_else(|| catalogue::current_platform().to_string())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the binary's patch state and the injected addons, without changing anything
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Remove an addon from the client UI
    Uninstall {
        /// Path to the addon directory
        #[arg(default_value = "myinstants-soundboard")]
        addon_dir: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Also restore the binary from its backup
        #[arg(long)]
        restore_binary: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        None => run_install(&cli.install),
        Some(Commands::Status { target }) => run_status(&target),
        Some(Commands::Uninstall {
            addon_dir,
            target,
            restore_binary,
        }) => run_uninstall(&addon_dir, &target, restore_binary),
    }
}

fn run_install(args: &InstallArgs) -> Result<()> {
    let layout = InstallLayout::new(&args.target.ts_dir);
    println!("Addon: {}", args.addon_dir.display());
    println!("Client dir: {}", args.target.ts_dir.display());
    println!();

    println!("[1/2] Patching binary...");
    let options = PatchOptions {
        platform: args.target.platform(),
        strict: args.strict,
    };
    let patched = match install::patch_binary(&layout, &args.target.patches, &options) {
        Ok(result) => report_patch(&result),
        Err(e) => {
            println!("  {e:#}");
            false
        }
    };
    if !patched {
        println!("Binary patching failed or unsupported version. Continuing anyway...");
    }
    println!();

    println!("[2/2] Injecting addon...");
    let summary = install::inject_addon(&args.addon_dir, &layout.index)?;
    if summary.replaced > 0 {
        println!("  Replaced {} earlier install(s)", summary.replaced);
    }
    println!(
        "  Addon '{}' {} injected into {} ({:?})",
        summary.name,
        summary.version,
        layout.index.display(),
        summary.location
    );
    println!();
    println!("Done! Restart the client to load the addon.");
    Ok(())
}

/// Print the outcome of the patch step. Returns false when nothing matched.
fn report_patch(result: &MatchResult) -> bool {
    match result {
        MatchResult::AlreadyPatched {
            version,
            detection: Detection::Fingerprint,
        } => {
            println!("  Already patched for {version}");
            true
        }
        MatchResult::AlreadyPatched {
            version,
            detection: Detection::Windows,
        } => {
            println!("  All offsets already patched for {version}");
            true
        }
        MatchResult::Applied(report) => {
            println!("  Bytes match {}, patches applied", report.version);
            let verb = match report.backup {
                backup::BackupOutcome::Created(_) => "saved to",
                backup::BackupOutcome::Existing(_) => "kept at",
            };
            println!("  Backup {verb} {}", report.backup.path().display());
            for offset in &report.written {
                println!("    Patched offset 0x{offset:X}");
            }
            for offset in &report.skipped {
                println!("    Offset 0x{offset:X} already patched");
            }
            println!("  Binary patched successfully");
            true
        }
        MatchResult::Partial {
            version,
            patched,
            total,
        } => {
            println!("  Partially patched for {version} ({patched} of {total} offsets); left as is");
            false
        }
        MatchResult::Unrecognized => {
            println!("  No matching patches for this binary version");
            false
        }
    }
}

fn run_status(target: &TargetArgs) -> Result<()> {
    let layout = InstallLayout::new(&target.ts_dir);
    let platform = target.platform();
    println!("Binary: {}", layout.binary.display());

    match PatchCatalogue::load(&target.patches) {
        Ok(catalogue) if catalogue.entries().is_empty() => {
            println!("  Catalogue {} has no entries", target.patches.display())
        }
        Ok(catalogue) => match matcher::inspect_file(&layout.binary, &catalogue, &platform) {
            Ok((digest, verdict)) => {
                println!("  Fingerprint: {digest}");
                match verdict {
                    Verdict::AlreadyPatched { entry, .. } => {
                        println!("  State: patched ({})", entry.version)
                    }
                    Verdict::Applicable {
                        entry,
                        already_patched: 0,
                    } => println!("  State: vanilla ({})", entry.version),
                    Verdict::Applicable {
                        entry,
                        already_patched,
                    } => println!(
                        "  State: partially patched ({}, {already_patched} of {} offsets)",
                        entry.version,
                        entry.set.patches.len()
                    ),
                    Verdict::Unrecognized => println!("  State: unrecognized version"),
                }
            }
            Err(e) => println!("  {e}"),
        },
        Err(e) => println!("  Catalogue unavailable: {e}"),
    }
    print_backup_state(&layout.binary);
    println!();

    println!("Document: {}", layout.index.display());
    let addons = install::list_addons(&layout.index)?;
    if addons.is_empty() {
        println!("  No addons injected");
    }
    for addon in addons {
        println!(
            "  {} {} \"{}\" (instance {}, format v{})",
            addon.id, addon.version, addon.name, addon.instance, addon.format
        );
    }
    Ok(())
}

fn print_backup_state(binary: &Path) {
    let backup = backup::backup_path(binary);
    if backup.exists() {
        println!("  Backup: {}", backup.display());
    } else {
        println!("  Backup: none");
    }
}

fn run_uninstall(addon_dir: &Path, target: &TargetArgs, restore_binary: bool) -> Result<()> {
    let layout = InstallLayout::new(&target.ts_dir);

    if restore_binary {
        println!("[1/2] Restoring binary...");
        match backup::restore(&layout.binary) {
            Ok(from) => println!("  Restored from {}", from.display()),
            Err(e) => println!("  {e}. Continuing anyway..."),
        }
        println!();
        println!("[2/2] Removing addon...");
    } else {
        println!("Removing addon...");
    }

    let removed = install::remove_addon(addon_dir, &layout.index)?;
    if removed == 0 {
        println!("  Addon not present in {}", layout.index.display());
    } else {
        println!("  Removed {removed} block(s) from {}", layout.index.display());
    }
    Ok(())
}
