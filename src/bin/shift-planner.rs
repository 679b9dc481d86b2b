//! Command-line front end for the planner.
//!
//! Reads a JSON array of services from a file (or stdin), plans it on the
//! compute host and writes the result JSON to stdout. Logs go to stderr;
//! set `RUST_LOG=shift_planner=debug` for per-shift detail.
//!
//! ```bash
//! shift-planner services.json --mode dbscan --max-points 6 --timeout-ms 5000
//! ```

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use shift_planner::borough::{NoBoroughs, RegionBoroughs};
use shift_planner::compute::{ComputeHost, ComputeStatus};
use shift_planner::config::{ComputeConfig, DbscanOptions, KMeansOptions};
use shift_planner::haversine::HaversineMatrix;
use shift_planner::model::RawService;
use shift_planner::osrm::{OsrmClient, OsrmConfig};
use shift_planner::traits::{BoroughClassifier, DistanceMatrixProvider};
use shift_planner::{ClusteringMode, PlanOptions, Planner, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    None,
    Kmeans,
    Dbscan,
}

/// Plan field services into technician shifts
#[derive(Parser, Debug)]
#[clap(name = "shift-planner")]
struct Args {
    /// Services JSON file; stdin when omitted
    input: Option<PathBuf>,

    /// Plan options JSON file; flags below override it
    #[clap(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Borough regions JSON file (`{"regions": [...]}`)
    #[clap(long, value_name = "FILE")]
    boroughs: Option<PathBuf>,

    /// OSRM base URL; straight-line distances when omitted
    #[clap(long)]
    osrm_url: Option<String>,

    #[clap(long, value_enum, default_value = "none")]
    mode: Mode,

    /// Smallest cluster size
    #[clap(long, default_value = "1")]
    min_points: usize,

    /// Largest cluster size
    #[clap(long, default_value = "10")]
    max_points: usize,

    #[clap(long)]
    max_points_per_shift: Option<usize>,

    #[clap(long)]
    max_technicians: Option<usize>,

    /// Random seed for k-means
    #[clap(long)]
    seed: Option<u64>,

    /// Allow cross-borough pairs up to the hard radius
    #[clap(long)]
    no_boundaries: bool,

    #[clap(long, default_value = "10000")]
    timeout_ms: u64,

    #[clap(long)]
    workers: Option<usize>,

    /// Pretty-print the result
    #[clap(long)]
    pretty: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let raw: Vec<RawService> = serde_json::from_str(&read_input(args.input.as_ref())?)?;
    let options = plan_options(&args)?;

    let distances: Arc<dyn DistanceMatrixProvider> = match &args.osrm_url {
        Some(url) => Arc::new(OsrmClient::new(OsrmConfig {
            base_url: url.clone(),
            ..OsrmConfig::default()
        })?),
        None => Arc::new(HaversineMatrix::default()),
    };
    let boroughs: Arc<dyn BoroughClassifier> = match &args.boroughs {
        Some(path) => Arc::new(serde_json::from_str::<RegionBoroughs>(&fs::read_to_string(path)?)?),
        None => Arc::new(NoBoroughs),
    };

    let mut compute = ComputeConfig {
        timeout_ms: args.timeout_ms,
        ..ComputeConfig::default()
    };
    if let Some(workers) = args.workers {
        compute.workers = workers;
    }
    let host = ComputeHost::new(compute)?;
    let planner = Planner::new(distances, boroughs);

    info!(services = raw.len(), "planning");
    let outcome = planner.submit(&host, "cli", raw, options).wait();
    if let Some(message) = &outcome.error {
        error!(%message, "planning failed, emitting fallback result");
    }

    let Some(result) = outcome.result else {
        error!(status = ?outcome.status, "no result");
        return Ok(ExitCode::FAILURE);
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", json);

    Ok(match outcome.status {
        ComputeStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::from(2),
    })
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => Ok(fs::read_to_string(path)?),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn plan_options(args: &Args) -> Result<PlanOptions> {
    let mut options: PlanOptions = match &args.options {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => PlanOptions::default(),
    };

    match args.mode {
        Mode::None => {}
        Mode::Kmeans => {
            options.clustering = ClusteringMode::KMeans(KMeansOptions {
                seed: args.seed,
                ..KMeansOptions::new(args.min_points, args.max_points)
            });
        }
        Mode::Dbscan => {
            options.clustering = ClusteringMode::Dbscan(DbscanOptions::new(args.min_points, args.max_points));
        }
    }
    if let Some(cap) = args.max_points_per_shift {
        options.schedule.max_points_per_shift = cap;
    }
    if let Some(cap) = args.max_technicians {
        options.schedule.max_technicians = cap;
    }
    if args.no_boundaries {
        options.schedule.enforce_boundaries = false;
    }
    Ok(options)
}
