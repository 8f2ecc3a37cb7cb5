mod benchmark;
mod collector;
mod config;
mod database;
mod distributed;
mod evaluation;
mod executors;
mod model;
mod scoreboard;
mod work;

use benchmark::{filter_benchmarks, load_benchmarks, BenchmarkEntry, BenchmarkError};
use clap::{ArgAction, Parser};
use collector::{DiscoveryError, ModelCollector};
use config::{ConfigErrors, RunnerConfig};
use distributed::{
    fs::FsCommunicator,
    local::{AbortOnPanic, LocalGroup},
    mpi::LaunchContext,
    Communicator, SyncError,
};
use evaluation::Evaluators;
use executors::{Executor, ExecutorError, RunOptions, RunReport};
use itertools::Itertools;
use model::ModelEntry;
use std::{error::Error as _, path::PathBuf, process::ExitCode, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Evaluate every model against every benchmark on a fixed group of workers
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory containing one subdirectory per model
    #[arg(long, env = "LOCKSTEP_MODEL_ROOT", default_value = "./")]
    model_root: PathBuf,
    /// Benchmark configuration (YAML)
    #[arg(long, env = "LOCKSTEP_CONFIG")]
    config: PathBuf,
    /// Only use these models (directory names)
    #[arg(long, num_args = 1..)]
    models: Vec<String>,
    /// Only run benchmarks whose longname contains one of these strings
    #[arg(long, num_args = 1..)]
    benchmarks: Vec<String>,
    /// Regions to evaluate, overrides the configuration
    #[arg(long, num_args = 1..)]
    regions: Vec<String>,
    /// Evaluate all pairs again, even if a result exists
    #[arg(long)]
    clean: bool,
    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
    /// Log more, may be given twice
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only use model files whose name contains this string
    #[arg(long, default_value = "")]
    filter: String,
    /// Directory receiving all results
    #[arg(long, env = "LOCKSTEP_BUILD_DIR", default_value = "./_build")]
    build_dir: PathBuf,
    /// Run this many workers as threads of this process
    #[arg(long, conflicts_with_all = ["rank", "size"])]
    workers: Option<usize>,
    /// Rank of this process, detected from mpirun/srun if missing
    #[arg(long, requires = "size")]
    rank: Option<usize>,
    /// Number of processes in the group, detected from mpirun/srun if missing
    #[arg(long, requires = "rank")]
    size: Option<usize>,
    /// Shared directory used by processes to synchronize, defaults to <build_dir>/.sync
    #[arg(long, env = "LOCKSTEP_SYNC_DIR")]
    sync_dir: Option<PathBuf>,
    /// Name of the run inside the sync directory, reusable once an earlier run of that name succeeded
    #[arg(long, env = "SLURM_JOB_ID", default_value = "run")]
    run_id: String,
    /// How often a waiting process checks the sync directory
    #[arg(long, default_value_t = 200)]
    poll_interval_ms: u64,
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("Failed to join the worker group")]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Worker {0} panicked")]
    Panicked(usize),
}

impl RunError {
    fn is_remote_abort(&self) -> bool {
        matches!(self, Self::Executor(error) if error.is_remote_abort())
    }
}

/// How the workers of this run are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Threads(usize),
    Processes { rank: usize, size: usize },
}

impl Group {
    fn from_cli(cli: &Cli) -> Result<Self, ConfigErrors> {
        if let Some(workers) = cli.workers {
            return match workers {
                0 => Err(ConfigErrors::InvalidWorkers(
                    "--workers must be at least 1".to_owned(),
                )),
                workers => Ok(Self::Threads(workers)),
            };
        }

        match (cli.rank, cli.size) {
            (Some(rank), Some(size)) if rank < size => Ok(Self::processes(rank, size)),
            (Some(rank), Some(size)) => Err(ConfigErrors::InvalidWorkers(format!(
                "--rank {rank} is outside of a group of size {size}"
            ))),
            _ => Ok(match LaunchContext::from_env() {
                Some(LaunchContext { rank, size }) => Self::processes(rank, size),
                None => Self::Threads(1),
            }),
        }
    }

    // a single process has nobody to synchronize with
    fn processes(rank: usize, size: usize) -> Self {
        match size {
            1 => Self::Threads(1),
            size => Self::Processes { rank, size },
        }
    }

    /// true if this process logs the run wide headings
    fn is_leader(&self) -> bool {
        match self {
            Self::Threads(_) => true,
            Self::Processes { rank, .. } => *rank == 0,
        }
    }
}

fn setup_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lockstep={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.quiet, cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");

            let mut source = error.source();
            while let Some(cause) = source {
                error!("Caused by: {cause}");
                source = cause.source();
            }

            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RunError> {
    // everything up to the model discovery only depends on replicated inputs, so every worker
    // fails the same way without having to talk to the others
    let mut config = RunnerConfig::load(&cli.config)?;
    if !cli.regions.is_empty() {
        config.regions = cli.regions.clone();
    }

    let errors = config.preflight_checks();
    if errors > 0 {
        return Err(ConfigErrors::Preflight(errors).into());
    }

    let group = Group::from_cli(&cli)?;
    let leader = group.is_leader();

    let benchmarks = filter_benchmarks(load_benchmarks(&config, &cli.build_dir)?, &cli.benchmarks);
    if benchmarks.is_empty() {
        warn!("No benchmark matches {:?}, nothing to evaluate", cli.benchmarks);
    }

    let models = ModelCollector::new(&cli.model_root)
        .allowed(cli.models.clone())
        .filter(cli.filter.clone())
        .extension(config.model_extension.clone())
        .collect()?;

    if leader {
        info!(
            "Evaluating {} model(s) against {} benchmark(s)",
            models.len(),
            benchmarks.len()
        );
        for model in models.iter() {
            info!(color = %model.color, files = model.files.len(), "Model {}", model.name);
        }
    }

    let options = RunOptions {
        build_dir: cli.build_dir.clone(),
        clean: cli.clean,
    };

    let reports = match group {
        Group::Threads(workers) => run_threads(workers, &models, &benchmarks, &options)?,
        Group::Processes { rank, size } => {
            let dir = cli
                .sync_dir
                .clone()
                .unwrap_or_else(|| cli.build_dir.join(".sync"))
                .join(&cli.run_id);
            let communicator = FsCommunicator::join(
                dir,
                rank,
                size,
                Duration::from_millis(cli.poll_interval_ms),
            )?;

            let report = run_worker(&communicator, &models, &benchmarks, &options)?;
            communicator.leave()?;

            vec![report]
        }
    };

    if leader {
        let total = |count: fn(&RunReport) -> usize| reports.iter().map(count).sum::<usize>();

        info!(
            completed = total(|report| report.completed),
            cached = total(|report| report.cached),
            failed = total(|report| report.failed),
            "Run finished, scores written to {}",
            options.scores_path().to_string_lossy()
        );
    }

    Ok(())
}

fn run_worker<C: Communicator>(
    communicator: &C,
    models: &[ModelEntry],
    benchmarks: &[BenchmarkEntry],
    options: &RunOptions,
) -> Result<RunReport, RunError> {
    let _span = info_span!("worker", rank = communicator.rank()).entered();
    let _guard = AbortOnPanic(communicator);

    // master flags belong to a single worker, every worker gets its own copy of the list
    let benchmarks = benchmarks
        .iter()
        .map(BenchmarkEntry::replicate)
        .collect_vec();

    Ok(Executor::new(communicator, &Evaluators, models, &benchmarks, options).execute()?)
}

fn run_threads(
    workers: usize,
    models: &[ModelEntry],
    benchmarks: &[BenchmarkEntry],
    options: &RunOptions,
) -> Result<Vec<RunReport>, RunError> {
    let group = LocalGroup::create(workers)?;
    debug!(workers, "Starting worker threads");

    let results = std::thread::scope(|scope| {
        let handles = group
            .iter()
            .map(|communicator| {
                scope.spawn(move || run_worker(communicator, models, benchmarks, options))
            })
            .collect_vec();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(RunError::Panicked(rank)))
            })
            .collect_vec()
    });

    let mut reports = Vec::with_capacity(workers);
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        return Ok(reports);
    }

    // workers failing because of an abort only echo the error of the worker that aborted
    let index = errors
        .iter()
        .position(|error| !error.is_remote_abort())
        .unwrap_or(0);

    Err(errors.swap_remove(index))
}
