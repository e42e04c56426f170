//! # Tresor CLI - Versioned document storage
//!
//! Command-line access to a Tresor archive.
//!
//! ## Usage
//! ```bash
//! # Store a page as a new document on an ad-hoc volume
//! tresor --volume v1=/data/v1 store '0.0|page.1' scan.pdf
//!
//! # Append a new version of document 12
//! tresor --config archive.json store '12.0|page.1' rescan.pdf
//!
//! # Load, delete and inspect
//! tresor --config archive.json load '12.2|page.1' --output page.pdf
//! tresor --config archive.json version 12.1
//! tresor --config archive.json delete 12.1
//!
//! # Rebuild metadata buckets into a directory of JSON files
//! tresor --config archive.json rebuild --buckets ./buckets
//!
//! # Show where a uid lives on disk
//! tresor path '1234567890.2|page.1' --root /data/v1
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use tresor::path::build_path;
use tresor::{
    Backend, JsonBucketStore, Options, ShaUid, Storage, StorageBuilder, StorageConfig,
    TresorError, VolumeConfig,
};

/// Tresor CLI - store, load and maintain versioned documents
#[derive(Parser)]
#[command(name = "tresor")]
#[command(version)]
#[command(about = "Versioned multi-volume document storage")]
#[command(long_about = None)]
struct Cli {
    /// JSON storage configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ad-hoc volume: name=path[,flat][,zip] (repeatable)
    #[arg(long = "volume", global = true, value_parser = parse_volume)]
    volumes: Vec<VolumeConfig>,

    /// Storage name when no configuration file is given
    #[arg(long, global = true, default_value = "tresor")]
    name: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file under a uid
    Store {
        /// Target uid, e.g. 0.0|page.1 for a new document
        uid: String,

        /// File to store
        file: PathBuf,

        /// Place a new document on this volume
        #[arg(long)]
        on: Option<String>,
    },

    /// Load an object
    Load {
        /// Object uid
        uid: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Probe this volume first
        #[arg(long)]
        on: Option<String>,
    },

    /// Delete an object, version or document
    #[command(alias = "rm")]
    Delete {
        /// Uid to delete
        uid: String,
    },

    /// Show the current version of a document
    Version {
        /// Any uid of the document
        uid: String,
    },

    /// Rebuild metadata buckets from the stored documents
    Rebuild {
        /// Write buckets as JSON files into this directory
        #[arg(long)]
        buckets: Option<PathBuf>,
    },

    /// Print the on-disk path of a uid without touching any volume
    Path {
        /// Uid to place
        uid: String,

        /// Flat volume layout
        #[arg(long)]
        flat: bool,

        /// Zip archive form
        #[arg(long)]
        zip: bool,

        /// Volume root
        #[arg(long, default_value = "")]
        root: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("tresor=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<TresorError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Path {
            uid,
            flat,
            zip,
            root,
        } => cmd_path(uid, *flat, *zip, root),
        Commands::Store { uid, file, on } => cmd_store(&cli, uid, file, on.clone()),
        Commands::Load { uid, output, on } => cmd_load(&cli, uid, output.as_deref(), on.clone()),
        Commands::Delete { uid } => {
            let storage = open_storage(&cli, None)?;
            storage.delete(uid, &Options::default())?;
            println!("{} Deleted {}", "✓".green().bold(), uid.yellow());
            Ok(())
        }
        Commands::Version { uid } => {
            let storage = open_storage(&cli, None)?;
            let version = storage.current_version(uid)?;
            println!("{}", version);
            Ok(())
        }
        Commands::Rebuild { buckets } => cmd_rebuild(&cli, buckets.as_deref()),
    }
}

/// Build the engine from `--config` or the ad-hoc `--volume` list
fn open_storage(cli: &Cli, buckets: Option<&Path>) -> anyhow::Result<Backend> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::from_file(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?,
        None => StorageConfig::new(cli.name.clone()),
    };
    config.volumes.extend(cli.volumes.iter().cloned());

    if config.volumes.is_empty() {
        bail!("No volumes configured. Use --config <file> or --volume name=path");
    }

    let mut builder = StorageBuilder::from_config(config);
    if let Some(dir) = buckets {
        builder = builder.bucket_store(Arc::new(JsonBucketStore::open(dir)?));
    }
    Ok(builder.build()?)
}

fn cmd_store(cli: &Cli, uid: &str, file: &Path, on: Option<String>) -> anyhow::Result<()> {
    let storage = open_storage(cli, None)?;
    let mut source = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );

    let start = Instant::now();
    let options = Options { volume_name: on };
    let receipt = storage.store(uid, &mut source, &options)?;

    println!(
        "{} Stored {} ({})",
        "✓".green().bold(),
        receipt.uid.yellow().bold(),
        format_bytes(receipt.size)
    );
    println!("  Digest: {}", receipt.digest_hex().cyan());
    if cli.verbose {
        println!("  Took: {}", format_duration(round_ms(start.elapsed())));
    }
    Ok(())
}

fn cmd_load(cli: &Cli, uid: &str, output: Option<&Path>, on: Option<String>) -> anyhow::Result<()> {
    let storage = open_storage(cli, None)?;
    let options = Options { volume_name: on };

    match output {
        Some(path) => {
            let mut dest = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            );
            let receipt = storage.load(uid, &mut dest, &options)?;
            dest.flush()?;

            println!(
                "{} Loaded {} ({}) into {}",
                "✓".green().bold(),
                uid.yellow().bold(),
                format_bytes(receipt.size),
                path.display()
            );
            println!("  Digest: {}", receipt.digest_hex().cyan());
            if cli.verbose {
                println!("  Source: {}", receipt.path.display());
            }
        }
        None => {
            let stdout = io::stdout();
            let mut dest = stdout.lock();
            storage.load(uid, &mut dest, &options)?;
            dest.flush()?;
        }
    }
    Ok(())
}

fn cmd_rebuild(cli: &Cli, buckets: Option<&Path>) -> anyhow::Result<()> {
    let storage = open_storage(cli, buckets)?;

    println!("{}", "Rebuilding metadata...".blue().bold());

    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Indexing {}", storage.name()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = storage.rebuild();
    pb.finish_and_clear();
    let count = result?;

    println!(
        "{} Rebuilt {} documents in {}",
        "✓".green().bold(),
        count.to_string().yellow().bold(),
        format_duration(round_ms(start.elapsed()))
    );
    if let Some(dir) = buckets {
        println!("  Buckets: {}", dir.display().to_string().cyan());
    }
    Ok(())
}

fn cmd_path(uid: &str, flat: bool, zip: bool, root: &Path) -> anyhow::Result<()> {
    let uid: ShaUid = uid.parse()?;
    println!("{}", build_path(root, &uid, flat, zip).display());
    Ok(())
}

/// Parse `name=path[,flat][,zip]`
fn parse_volume(s: &str) -> Result<VolumeConfig, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{}'", s))?;

    let mut parts = rest.split(',');
    let path = parts.next().unwrap_or_default();
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected name=path, got '{}'", s));
    }

    let mut volume = VolumeConfig::new(name, path);
    for flag in parts {
        match flag {
            "flat" => volume = volume.flat(true),
            "zip" => volume = volume.zip(true),
            other => return Err(format!("unknown volume flag '{}'", other)),
        }
    }
    Ok(volume)
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
