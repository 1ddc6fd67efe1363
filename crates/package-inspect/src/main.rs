//! package-inspect: read-only look into a package file.
//!
//! Never takes the lock and never runs upgrades, so it is safe to point at a
//! document that is open in an editor.

use anyhow::Result;
use clap::{Parser, Subcommand};
use package_core::inspect::{summarize, PackageSummary};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "package-inspect")]
#[command(about = "Inspect versioned document packages")]
struct Args {
    /// Application folder whose changelog to read (defaults to the only one)
    #[arg(long, global = true)]
    app: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Versions, applications and sidecar files
    Info { path: PathBuf },
    /// Changelog of the selected application
    Changelog { path: PathBuf },
    /// Every archive entry with its size and timestamp
    Entries { path: PathBuf },
    /// Who holds the editing lock, if anyone
    Lock { path: PathBuf },
}

impl Command {
    fn path(&self) -> &PathBuf {
        match self {
            Command::Info { path }
            | Command::Changelog { path }
            | Command::Entries { path }
            | Command::Lock { path } => path,
        }
    }
}

fn print_info(summary: &PackageSummary) {
    println!("Package:      {}", summary.path.display());
    println!("Format:       {}", summary.package_version);
    if summary.applications.is_empty() {
        println!("Applications: none");
    }
    for app in &summary.applications {
        println!("Application:  {} {}", app.name, app.version);
    }
    println!("Entries:      {}", summary.entries.len());
    println!("Changelog:    {} entries", summary.changelog.len());
    match &summary.lock {
        Some(lock) => println!("Locked by:    {} since {}", lock.username, lock.date_opened),
        None => println!("Locked by:    nobody"),
    }
    println!("Backup:       {}", if summary.has_backup { "yes" } else { "no" });
    println!("Auto-save:    {}", if summary.has_auto_save { "yes" } else { "no" });
}

fn print_changelog(summary: &PackageSummary) {
    if summary.changelog.is_empty() {
        println!("No changelog entries");
        return;
    }
    for entry in &summary.changelog {
        let note = if entry.note.is_empty() {
            String::new()
        } else {
            format!("  ({})", entry.note)
        };
        println!(
            "{}  {:<18} {}@{}{}",
            entry.time.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.kind),
            entry.username,
            entry.computer_name,
            note
        );
    }
}

fn print_entries(summary: &PackageSummary) {
    for entry in &summary.entries {
        println!("{:>10}  {}  {}", entry.size, entry.modified, entry.name);
    }
}

fn print_lock(summary: &PackageSummary) {
    match &summary.lock {
        Some(lock) => println!("Locked by {} since {}", lock.username, lock.date_opened),
        None => println!("Not locked"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to warn (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,package_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = args.command.path();
    debug!("Inspecting {:?}", path);
    let summary = summarize(path, args.app.as_deref()).await?;

    if args.json {
        let value = match &args.command {
            Command::Info { .. } => serde_json::to_value(&summary)?,
            Command::Changelog { .. } => serde_json::to_value(&summary.changelog)?,
            Command::Entries { .. } => serde_json::to_value(&summary.entries)?,
            Command::Lock { .. } => serde_json::to_value(&summary.lock)?,
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match &args.command {
        Command::Info { .. } => print_info(&summary),
        Command::Changelog { .. } => print_changelog(&summary),
        Command::Entries { .. } => print_entries(&summary),
        Command::Lock { .. } => print_lock(&summary),
    }
    Ok(())
}
