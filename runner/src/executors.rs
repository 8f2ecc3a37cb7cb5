mod local;
mod post;

use crate::{
    benchmark::BenchmarkEntry,
    database::{ledger_path, Ledger, LedgerError, PairStatus},
    distributed::{
        election::{elect_masters, ElectionError},
        Communicator, SyncError,
    },
    evaluation::{EvaluationError, Evaluator, Failure, Stage},
    model::ModelEntry,
    scoreboard::ScoreboardError,
    work::{cross_join, local_slice},
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Scoreboard(#[from] ScoreboardError),
    #[error("Evaluator failed during {stage} of {subject}")]
    Evaluation {
        stage: Stage,
        subject: String,
        #[source]
        source: EvaluationError,
    },
    #[error("Failed to create output directory {0:?}")]
    Output(PathBuf, #[source] std::io::Error),
}

impl ExecutorError {
    /// true if this worker only failed because another worker aborted the run
    pub fn is_remote_abort(&self) -> bool {
        matches!(
            self,
            Self::Sync(SyncError::Aborted(_))
                | Self::Election(ElectionError::Sync(SyncError::Aborted(_)))
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub build_dir: PathBuf,
    // evaluate pairs even if their artifact already exists
    pub clean: bool,
}

impl RunOptions {
    pub fn ledger_dir(&self) -> PathBuf {
        self.build_dir.join(".ledger")
    }

    pub fn scores_path(&self) -> PathBuf {
        self.build_dir.join("scores.csv")
    }
}

/// What a single worker did during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub rank: usize,
    pub local: usize,
    pub completed: usize,
    pub cached: usize,
    pub failed: usize,
    pub scored: usize,
    pub unscored: usize,
    // longnames of the benchmarks this worker composited
    pub composited: Vec<String>,
}

impl RunReport {
    fn count(&mut self, status: PairStatus) {
        match status {
            PairStatus::Completed => self.completed += 1,
            PairStatus::Cached => self.cached += 1,
            PairStatus::Failed => self.failed += 1,
        }
    }
}

/// Drives both phases of a run on one worker
///
/// Every worker of the group builds its own executor over the same models and benchmarks and
/// calls `execute`, the collectives inside keep the workers in lockstep.
pub struct Executor<'a, C: Communicator, E: Evaluator> {
    communicator: &'a C,
    evaluator: &'a E,
    models: &'a [ModelEntry],
    benchmarks: &'a [BenchmarkEntry],
    options: &'a RunOptions,
}

impl<'a, C: Communicator, E: Evaluator> Executor<'a, C, E> {
    pub fn new(
        communicator: &'a C,
        evaluator: &'a E,
        models: &'a [ModelEntry],
        benchmarks: &'a [BenchmarkEntry],
        options: &'a RunOptions,
    ) -> Self {
        Self {
            communicator,
            evaluator,
            models,
            benchmarks,
            options,
        }
    }

    /// Run both phases, aborting the whole group if this worker fails
    pub fn execute(&self) -> Result<RunReport, ExecutorError> {
        match self.run() {
            Ok(report) => Ok(report),
            Err(error) => {
                // nothing to propagate, the worker that aborted already told everybody
                if !error.is_remote_abort() {
                    self.communicator.abort(&error.to_string());
                }

                Err(error)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn run(&self) -> Result<RunReport, ExecutorError> {
        let rank = self.communicator.rank();
        let size = self.communicator.size();

        let work = cross_join(self.models.len(), self.benchmarks.len());
        let local = local_slice(&work, size, rank);

        if rank == 0 {
            info!(
                models = self.models.len(),
                benchmarks = self.benchmarks.len(),
                pairs = work.len(),
                workers = size,
                "Built work list"
            );
        }
        debug!(rank, local = local.len(), "Received local work");

        let masters = elect_masters(self.communicator, self.benchmarks, local)?;
        if rank == 0 {
            for (benchmark, master) in self.benchmarks.iter().zip(masters) {
                debug!(benchmark = %benchmark.longname, master, "Master elected");
            }
        }

        for benchmark in self.benchmarks {
            std::fs::create_dir_all(&benchmark.output)
                .map_err(|error| ExecutorError::Output(benchmark.output.clone(), error))?;
        }

        let ledger = Ledger::create(&ledger_path(&self.options.ledger_dir(), rank))?;
        let mut report = RunReport {
            rank,
            local: local.len(),
            ..Default::default()
        };

        if rank == 0 {
            info!("Evaluating pairs");
        }
        self.evaluate(local, &ledger, &mut report)?;
        self.communicator.barrier()?;

        self.post_process(local, &ledger, &mut report)?;
        ledger.close()?;

        info!(
            rank,
            completed = report.completed,
            cached = report.cached,
            failed = report.failed,
            scored = report.scored,
            "Worker finished"
        );

        Ok(report)
    }
}

/// Split the result of an evaluator call into expected failures, which are logged and skipped,
/// and everything else, which ends the run
fn isolate<T>(
    result: Result<T, EvaluationError>,
    stage: Stage,
    subject: impl FnOnce() -> String,
) -> Result<Result<T, Failure>, ExecutorError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(EvaluationError::Failure(failure)) => {
            warn!(stage = %stage, "{}: {failure}", subject());

            Ok(Err(failure))
        }
        Err(source) => Err(ExecutorError::Evaluation {
            stage,
            subject: subject(),
            source,
        }),
    }
}

#[cfg(test)]
mod executors_test;
