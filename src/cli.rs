//! CLI interface for Edgestash
//!
//! Provides command-line interface for:
//! - Draining a spool directory of trace jobs into the stores
//! - Ingesting a single raw trace file
//! - Queueing raw traces as spool jobs
//! - Inspecting stored traces and store statistics

use crate::bitmap::Codec;
use crate::config::{IngestConfig, StoreConfig, StoreLayout, DEFAULT_STORE_NAME};
use crate::ingest::TraceIngestor;
use crate::interner::EdgeInterner;
use crate::job::{SpoolDir, TraceJob};
use crate::store::DEFAULT_MAP_SIZE;
use crate::trace::{EdgeId, MalformedLinePolicy};
use crate::trace_store::TraceStore;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edgestash")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deduplicate and store code-coverage traces as compressed edge bitmaps")]
#[command(
    long_about = "Edgestash - interning store for code-coverage traces\n\n\
    Every control-flow edge seen in a trace is interned into a dense integer id that\n\
    is shared by all traces and all worker processes. Each trace is then stored as a\n\
    compressed bitmap over those ids together with its covered-edge count.\n\n\
    Examples:\n\
      edgestash --dir ./cov enqueue -t run1.trace -s ./spool\n\
      edgestash --dir ./cov ingest -s ./spool -v\n\
      edgestash --dir ./cov show -f run1.trace\n\
      edgestash --dir ./cov stats"
)]
#[command(author = "Edgestash Contributors")]
pub struct Cli {
    /// Directory holding the LMDB environments
    #[arg(short, long, global = true, default_value = ".", value_name = "DIR")]
    pub dir: PathBuf,

    /// Store name; environments are <name>-lookup and <name>-traces
    #[arg(short, long, global = true, default_value = DEFAULT_STORE_NAME)]
    pub name: String,

    /// Keep the mapping and the traces in one environment named <name>
    #[arg(long, global = true)]
    pub shared: bool,

    /// LMDB map size per environment, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_MAP_SIZE, value_name = "BYTES")]
    pub map_size: usize,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process every job in a spool directory
    #[command(
        long_about = "Process every job in a spool directory\n\n\
        Each *.json file holds {\"filename\": ..., \"trace_output\": ...}. A job file is\n\
        deleted only after its trace is stored; failed jobs stay in the directory and are\n\
        picked up again by the next run.\n\n\
        Example:\n\
          edgestash --dir ./cov ingest --spool ./spool --strict"
    )]
    Ingest {
        /// Spool directory to drain
        #[arg(short, long, value_name = "DIR", help_heading = "Required")]
        spool: PathBuf,

        /// Fail a job on its first malformed line instead of skipping the line
        #[arg(long)]
        strict: bool,

        /// Compression for new bitmaps (none, zstd, lz4)
        #[arg(long, default_value_t = Codec::default())]
        codec: Codec,
    },

    /// Ingest one raw trace file directly
    Add {
        /// Raw trace output
        #[arg(short, long, value_name = "FILE", help_heading = "Required")]
        trace: PathBuf,

        /// Name to store the trace under (defaults to the file name)
        #[arg(short, long)]
        filename: Option<String>,

        #[arg(long)]
        strict: bool,

        #[arg(long, default_value_t = Codec::default())]
        codec: Codec,
    },

    /// Queue a raw trace file as a spool job
    Enqueue {
        #[arg(short, long, value_name = "FILE", help_heading = "Required")]
        trace: PathBuf,

        #[arg(short, long, value_name = "DIR", help_heading = "Required")]
        spool: PathBuf,

        #[arg(short, long)]
        filename: Option<String>,
    },

    /// Decode a stored trace and list its edges
    Show {
        #[arg(short, long, help_heading = "Required")]
        filename: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print store statistics
    Stats,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = StoreConfig {
        dir: cli.dir.clone(),
        name: cli.name.clone(),
        map_size: cli.map_size,
        layout: if cli.shared {
            StoreLayout::Shared
        } else {
            StoreLayout::Separate
        },
    };

    match cli.command {
        Commands::Ingest {
            spool,
            strict,
            codec,
        } => {
            let config = ingest_config(store, codec, strict);
            let mut ingestor = TraceIngestor::open(&config)?;
            let mut source = SpoolDir::open(&spool)
                .with_context(|| format!("opening spool {}", spool.display()))?;

            let summary = ingestor.run(&mut source)?;
            ingestor.close()?;

            println!("Processed: {}", summary.processed);
            println!("Failed:    {}", summary.failed);
            if source.rejected() > 0 {
                println!("Rejected:  {}", source.rejected());
            }
            if summary.failed > 0 {
                bail!("{} job(s) left in {}", summary.failed, spool.display());
            }
            Ok(())
        }

        Commands::Add {
            trace,
            filename,
            strict,
            codec,
        } => {
            let job = read_job(&trace, filename)?;
            let config = ingest_config(store, codec, strict);
            let mut ingestor = TraceIngestor::open(&config)?;
            let summary = ingestor.save_trace(&job.filename, &job.trace_output)?;
            ingestor.close()?;

            println!("Stored {}", summary.filename);
            println!("  Covered edges: {}", summary.covered);
            println!("  Packed size:   {} bytes", summary.packed_bytes);
            if summary.skipped_lines > 0 {
                println!("  Skipped lines: {}", summary.skipped_lines);
            }
            Ok(())
        }

        Commands::Enqueue {
            trace,
            spool,
            filename,
        } => {
            let job = read_job(&trace, filename)?;
            let path = SpoolDir::submit(&spool, &job)?;
            println!("Queued {} as {}", job.filename, path.display());
            Ok(())
        }

        Commands::Show { filename, json } => {
            let (lookup, traces) = store.open()?;
            let interner = EdgeInterner::new(lookup);
            let traces = TraceStore::new(traces);

            let Some(record) = traces.load(&filename)? else {
                bail!("no trace stored under {filename:?}");
            };
            let ids = record.ids()?;
            let edges = interner.resolve_all(ids.iter().filter_map(|&id| EdgeId::new(id)))?;

            if json {
                let doc = serde_json::json!({
                    "filename": filename,
                    "covered": record.covered_count,
                    "packed_bytes": record.bitmap.len(),
                    "edges": edges.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("Trace: {filename}");
                println!("  Covered edges: {}", record.covered_count);
                println!("  Packed size:   {} bytes", record.bitmap.len());
                for edge in &edges {
                    println!("  {edge}");
                }
            }
            Ok(())
        }

        Commands::Stats => {
            let (lookup, traces) = store.open()?;
            let interner = EdgeInterner::new(lookup);
            let traces = TraceStore::new(traces);
            println!("Distinct edges: {}", interner.edge_count()?);
            println!("Stored traces:  {}", traces.trace_count()?);
            Ok(())
        }
    }
}

fn ingest_config(store: StoreConfig, codec: Codec, strict: bool) -> IngestConfig {
    IngestConfig {
        store,
        codec,
        malformed: if strict {
            MalformedLinePolicy::Fail
        } else {
            MalformedLinePolicy::Skip
        },
    }
}

fn read_job(trace: &Path, filename: Option<String>) -> anyhow::Result<TraceJob> {
    let trace_output =
        fs::read_to_string(trace).with_context(|| format!("reading {}", trace.display()))?;
    let filename = match filename {
        Some(name) => name,
        None => trace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("trace path has no file name")?,
    };
    Ok(TraceJob::new(filename, trace_output))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
