use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docdb::{ConfigSnapshot, DocDbConfig, DocumentDb, FlushProfile, Schema};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "docdb")]
#[command(about = "Inspect and maintain a document database on disk", long_about = None)]
struct Args {
    /// Document database name
    #[arg(long, env = "DOCDB_NAME")]
    name: String,

    /// Data directory holding the document databases
    #[arg(long, env = "DOCDB_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Distribution key of this node
    #[arg(long, env = "DOCDB_DISTRIBUTION_KEY", default_value = "0")]
    distribution_key: u32,

    /// Config snapshot (JSON) used when the database has none persisted
    #[arg(long, env = "DOCDB_CONFIG")]
    config: Option<PathBuf>,

    /// Flush profile (eager, balanced, lazy)
    #[arg(long, env = "DOCDB_FLUSH_PROFILE", default_value = "balanced")]
    profile: String,

    /// Worker threads for loading and flushing (0 = number of CPUs)
    #[arg(long, env = "DOCDB_WORKER_THREADS", default_value = "0")]
    worker_threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the database, replay the log and print serial bounds
    Inspect,
    /// Flush every target and prune the transaction log
    Flush {
        /// Only flush targets above the profile threshold
        #[arg(long)]
        if_needed: bool,
    },
    /// Drop data kept for fields removed from the config
    WipeHistory,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("docdb v{} - {}", docdb::VERSION, args.name);

    let profile = match args.profile.to_lowercase().as_str() {
        "eager" => FlushProfile::Eager,
        "balanced" => FlushProfile::Balanced,
        "lazy" => FlushProfile::Lazy,
        _ => {
            warn!("Unknown flush profile '{}', using 'balanced'", args.profile);
            FlushProfile::Balanced
        }
    };
    let mut config = DocDbConfig::new(args.name.clone(), args.data_dir.clone(), args.distribution_key)
        .with_flush_profile(profile)
        .with_background_reprocessing(false);
    if args.worker_threads > 0 {
        config = config.with_worker_threads(args.worker_threads);
    }

    let initial = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<ConfigSnapshot>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ConfigSnapshot::new(0, args.name.clone(), Schema::new()),
    };

    let db = DocumentDb::open(config, initial).context("opening document database")?;
    let replay = db.replay_stats();
    info!(
        "Replayed {} records from serial {}",
        replay.records, replay.from_serial
    );

    match args.command {
        Command::Inspect => {
            let tlog = db.tlog_stats()?;
            println!("state:                 {}", db.state());
            println!("config generation:     {}", db.active_config().generation);
            println!("last serial:           {}", db.last_serial());
            println!("oldest flushed serial: {}", db.oldest_flushed_serial());
            println!("newest flushed serial: {}", db.newest_flushed_serial());
            println!("prune serial:          {}", db.prune_serial());
            println!("tlog records:          {} ({} bytes)", tlog.records, tlog.bytes);
            println!("documents:             {} ({} active)", db.num_docs(), db.num_active_docs());
            for sub_db in db.sub_dbs() {
                println!(
                    "  {:<24} docs={:<8} oldest={:<8} newest={}",
                    sub_db.name(),
                    sub_db.get_num_docs(),
                    sub_db.get_oldest_flushed_serial(),
                    sub_db.get_newest_flushed_serial()
                );
            }
            let history = db.history_schema();
            if !history.is_empty() {
                println!("history fields:        {:?}", history.field_names());
            }
        }
        Command::Flush { if_needed } => {
            let report = if if_needed {
                db.flush_if_needed()?
            } else {
                db.flush()?
            };
            println!(
                "flushed {} targets to serial {}, {} failed, prune: {:?}",
                report.flushed.len(),
                report.target_serial,
                report.failed.len(),
                report.prune
            );
            for name in &report.failed {
                warn!("Flush of {} failed", name);
            }
        }
        Command::WipeHistory => {
            let outcome = db.wipe_history()?;
            println!("wipe history: {:?}", outcome);
        }
    }

    db.close().context("closing document database")?;
    Ok(())
}
