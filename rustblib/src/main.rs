//! # rustblib
//!
//! Builds, merges and inspects BiblioSpec spectral libraries.
//!
//! ```bash
//! # merge two libraries into a new one
//! rustblib merge combined.blib first.blib second.blib --overwrite
//!
//! # print library metadata as JSON
//! rustblib info combined.blib
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use rustblib::config::LibraryConfig;
use rustblib::library::handle::BlibLibrary;
use rustblib::merge::merger::MergeSelection;

#[derive(Parser)]
#[command(name = "rustblib")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML file with a [library] section
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge libraries into a target library, creating it if needed
    Merge {
        /// Library to create or append to
        #[arg(value_name = "TARGET")]
        target: PathBuf,

        /// Libraries to copy all spectra from
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<PathBuf>,

        /// Replace the target instead of appending to it
        #[arg(short, long)]
        overwrite: bool,

        /// Mark the library as non-redundant in its LSID
        #[arg(long)]
        nr: bool,

        /// LSID authority
        #[arg(short, long)]
        authority: Option<String>,

        /// LSID library id, defaults to the file name of TARGET
        #[arg(short, long)]
        id: Option<String>,

        /// SQLite cache size in megabytes
        #[arg(long, value_name = "MB")]
        cache_size: Option<u32>,

        /// Spectra copied per transaction
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Print LSID, revision and contents of a library as JSON
    Info {
        #[arg(value_name = "LIBRARY")]
        library: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &cli.config {
        Some(path) => LibraryConfig::from_file(path)?,
        None => LibraryConfig::default(),
    };

    match cli.command {
        Commands::Merge {
            target,
            sources,
            overwrite,
            nr,
            authority,
            id,
            cache_size,
            batch_size,
        } => {
            let mut config = config;
            config.overwrite |= overwrite;
            if nr {
                config.redundant = false;
            }
            if let Some(authority) = authority {
                config.authority = authority;
            }
            if id.is_some() {
                config.library_id = id;
            }
            if let Some(cache_size) = cache_size {
                config.cache_size_mb = cache_size;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            run_merge(target, sources, config)
        }
        Commands::Info { library } => run_info(library),
    }
}

fn run_merge(target: PathBuf, sources: Vec<PathBuf>, config: LibraryConfig) -> Result<()> {
    let mut library = BlibLibrary::open(&target, config)
        .with_context(|| format!("Failed to open library {}", target.display()))?;

    for source in &sources {
        let report = library
            .merge_from(source, &MergeSelection::All)
            .with_context(|| format!("Failed to merge {}", source.display()))?;
        info!(
            "{}: {} spectra copied, {} skipped",
            source.display(),
            report.count(),
            report.failures.len()
        );
    }

    let revision = library.commit().context("Failed to commit library")?;
    info!(
        "{} now holds {} spectra (revision {})",
        target.display(),
        library.spectrum_count()?,
        revision.revision
    );
    Ok(())
}

fn run_info(path: PathBuf) -> Result<()> {
    let library = BlibLibrary::open_read_only(&path)
        .with_context(|| format!("Failed to open library {}", path.display()))?;
    let info = library.info()?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
