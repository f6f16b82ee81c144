//! Blockset combo precompute CLI
//!
//! # Usage
//!
//! ```bash
//! # Search lengths up to 6 for the 81-piece gauge set
//! blockset-combo update --store combo.bin --max-len 6
//!
//! # Compile the store into a compressed lookup artifact
//! blockset-combo encode --store combo.bin --out combo.bitmap
//!
//! # Validate, merge and compare stores
//! blockset-combo check combo.bin
//! blockset-combo merge -o best.bin a.bin b.bin
//! blockset-combo stats a.bin b.bin
//! ```

use anyhow::{bail, Context};
use blockset_core::stats::{
    compare_maps, count_by_length, cumulative_by_length, merge_best, target_span,
};
use blockset_core::{encode, validate_map, Alphabet, Compression, Weight};
use blockset_orchestration::checkpoint::write_snapshot;
use blockset_orchestration::orchestrator::stale_batch_dirs;
use blockset_orchestration::{
    load_snapshot, run_worker, BatchOrchestrator, CheckpointStore, OrchestratorError,
    PipelineConfig, StoreSnapshot, WorkerBinary,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockset-combo")]
#[command(about = "Exhaustive best decompositions into distinct gauge blocks", long_about = None)]
struct Cli {
    /// YAML configuration file (version: 1)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extend a store up to a decomposition length
    Update {
        /// Store file
        #[arg(short, long, default_value = "combo.bin")]
        store: PathBuf,

        /// Largest length to search
        #[arg(long)]
        max_len: usize,

        /// Alphabet weights (default: the 81-piece gauge set)
        #[arg(long, value_delimiter = ',')]
        weights: Vec<Weight>,

        /// Fixed-point scale of --weights, for labels only
        #[arg(long, default_value = "1")]
        scale: u32,

        /// Concurrent workers (0=auto)
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Directory for batch context, artifacts and worker logs
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Run lengths within this distance of 0 or N inline
        #[arg(long)]
        cutoff: Option<usize>,

        /// Do not install the signal trap
        #[arg(long)]
        no_trap: bool,
    },

    /// Run one job (spawned by `update`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        context: PathBuf,

        #[arg(long)]
        length: usize,

        #[arg(long, value_delimiter = ',')]
        prefix: Vec<Weight>,

        #[arg(long, value_delimiter = ',')]
        suffix: Vec<Weight>,

        #[arg(long)]
        out: PathBuf,
    },

    /// Compile a store into a range-indexed bitmap artifact
    Encode {
        #[arg(short, long, default_value = "combo.bin")]
        store: PathBuf,

        #[arg(short, long, default_value = "combo.bitmap")]
        out: PathBuf,

        /// Store the bit buffer uncompressed
        #[arg(long)]
        no_compress: bool,

        /// zlib level (default from config)
        #[arg(long)]
        level: Option<u32>,
    },

    /// Validate every decomposition of each store
    Check {
        #[arg(required = true)]
        stores: Vec<PathBuf>,
    },

    /// Merge stores, keeping the best decomposition per target
    Merge {
        #[arg(short, long, default_value = "best.bin")]
        out: PathBuf,

        #[arg(required = true)]
        stores: Vec<PathBuf>,
    },

    /// Counts per length, and pairwise comparison of stores
    Stats {
        #[arg(required = true)]
        stores: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e
                .downcast_ref::<OrchestratorError>()
                .map_or(1, |err| err.kind().exit_code());
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Update {
            store,
            max_len,
            weights,
            scale,
            parallelism,
            work_dir,
            cutoff,
            no_trap,
        } => {
            let mut config = config;
            if let Some(p) = parallelism {
                config.parallelism = p;
            }
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if let Some(c) = cutoff {
                config.parallel_cutoff = c;
            }
            if no_trap {
                config.trap_signals = false;
            }
            config.validate()?;

            let alphabet = if weights.is_empty() {
                Alphabet::gauge_81()
            } else {
                Alphabet::new(weights, scale)?
            };
            update(config, &store, &alphabet, max_len)
        }
        Commands::Worker {
            context,
            length,
            prefix,
            suffix,
            out,
        } => {
            run_worker(&context, length, &prefix, &suffix, &out)?;
            Ok(())
        }
        Commands::Encode {
            store,
            out,
            no_compress,
            level,
        } => {
            let compression = if no_compress {
                Compression::None
            } else {
                Compression::Zlib {
                    level: level.unwrap_or(config.compression_level).min(9),
                }
            };
            encode_store(&store, &out, compression)
        }
        Commands::Check { stores } => check(&stores),
        Commands::Merge { out, stores } => merge(&out, &stores),
        Commands::Stats { stores } => stats(&stores),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_yaml(p)
            .with_context(|| format!("loading {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(config.with_env()?)
}

fn update(config: PipelineConfig, path: &Path, alphabet: &Alphabet, max_len: usize) -> anyhow::Result<()> {
    for dir in stale_batch_dirs(&config.work_dir) {
        warn!("Leftover batch directory from a failed run: {}", dir.display());
    }
    let launcher = Arc::new(WorkerBinary::current_exe()?);
    let orchestrator = BatchOrchestrator::new(config, launcher);
    let mut store = CheckpointStore::open(path, alphabet)?;
    let report = store.extend(&orchestrator, max_len)?;
    for line in &report.lengths {
        println!(
            "length {:>2}: {:>8} new targets, {:>6} jobs, {:>8} ms",
            line.length, line.new_targets, line.jobs_run, line.duration_ms
        );
    }
    println!(
        "{}: lengths {}..={}, {} targets",
        path.display(),
        report.from_len + 1,
        report.to_len,
        report.total_targets
    );
    store.close();
    Ok(())
}

fn require_snapshot(path: &Path) -> anyhow::Result<StoreSnapshot> {
    match load_snapshot(path)? {
        Some(s) => Ok(s),
        None => bail!("{} does not exist", path.display()),
    }
}

fn encode_store(store: &Path, out: &Path, compression: Compression) -> anyhow::Result<()> {
    let snapshot = require_snapshot(store)?;
    let (artifact, report) = encode(&snapshot.entries, &snapshot.alphabet, compression)?;
    artifact
        .write_to(out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{}", report);
    Ok(())
}

fn check(stores: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed = 0;
    for path in stores {
        let snapshot = require_snapshot(path)?;
        let failures = validate_map(&snapshot.entries, &snapshot.alphabet);
        if failures.is_empty() {
            println!("{} OK", path.display());
        } else {
            for (target, err) in failures.iter().take(20) {
                eprintln!("{}: target {}: {}", path.display(), target, err);
            }
            eprintln!("{} Failed ({} invalid)", path.display(), failures.len());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} stores failed validation", failed, stores.len());
    }
    Ok(())
}

fn merge(out: &Path, stores: &[PathBuf]) -> anyhow::Result<()> {
    let snapshots = stores
        .iter()
        .map(|p| require_snapshot(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let Some(first) = snapshots.first() else {
        bail!("nothing to merge");
    };
    if let Some((i, _)) = snapshots
        .iter()
        .enumerate()
        .find(|(_, s)| s.alphabet != first.alphabet)
    {
        bail!("{} uses a different alphabet than {}", stores[i].display(), stores[0].display());
    }
    let entries = merge_best(snapshots.iter().map(|s| &s.entries));
    let merged = StoreSnapshot {
        // no length is known to be exhaustively searched in a merged store
        max_len: 0,
        entries,
        ..StoreSnapshot::empty(first.alphabet.clone())
    };
    write_snapshot(out, &merged)?;
    println!("{}: {} targets", out.display(), merged.entries.len());
    Ok(())
}

fn stats(stores: &[PathBuf]) -> anyhow::Result<()> {
    let snapshots = stores
        .iter()
        .map(|p| require_snapshot(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    for (path, snapshot) in stores.iter().zip(&snapshots) {
        match target_span(&snapshot.entries) {
            Some((min, max)) => println!(
                "{}: {} targets in {}..={}",
                path.display(),
                snapshot.entries.len(),
                min,
                max
            ),
            None => println!("{}: empty", path.display()),
        }
        let cumulative = cumulative_by_length(&snapshot.entries);
        println!("{:>6} {:>10} {:>12}", "Length", "Count", "Cumulative");
        for (len, n) in count_by_length(&snapshot.entries) {
            println!("{:>6} {:>10} {:>12}", len, n, cumulative[&len]);
        }
        println!();
    }

    for (i, a) in snapshots.iter().enumerate() {
        for (j, b) in snapshots.iter().enumerate() {
            if i == j {
                continue;
            }
            println!("Compare {} v. {}:", stores[i].display(), stores[j].display());
            println!("{}\n", compare_maps(&a.entries, &b.entries));
        }
    }
    Ok(())
}
