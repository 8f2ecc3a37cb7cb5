pub mod exec;

use crate::{benchmark::BenchmarkEntry, config::EvaluatorConfig, model::ModelEntry, work::Pair};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use thiserror::Error;

/// Closed set of expected, per pair failure categories
///
/// An evaluation failing with one of these is recorded and the run continues with the next pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    VarNotInModel,
    AreasNotInModel,
    VarNotMonthly,
    VarNotOnTimeScale,
    NotTemporalVariable,
    UnitConversion,
    Analysis,
    VarsNotComparable,
}

impl FailureKind {
    pub const ALL: [FailureKind; 8] = [
        Self::VarNotInModel,
        Self::AreasNotInModel,
        Self::VarNotMonthly,
        Self::VarNotOnTimeScale,
        Self::NotTemporalVariable,
        Self::UnitConversion,
        Self::Analysis,
        Self::VarsNotComparable,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VarNotInModel => "var_not_in_model",
            Self::AreasNotInModel => "areas_not_in_model",
            Self::VarNotMonthly => "var_not_monthly",
            Self::VarNotOnTimeScale => "var_not_on_time_scale",
            Self::NotTemporalVariable => "not_temporal_variable",
            Self::UnitConversion => "unit_conversion",
            Self::Analysis => "analysis",
            Self::VarsNotComparable => "vars_not_comparable",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error of an evaluation stage
///
/// Only `Failure` is expected, every other variant means the environment or the evaluator itself
/// is broken and ends the run.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error(transparent)]
    Failure(#[from] Failure),
    #[error("Failed to spawn evaluator {exec}")]
    Spawn {
        exec: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Evaluator exited with {status} during {stage}: {stderr}")]
    Crashed {
        stage: Stage,
        status: String,
        stderr: String,
    },
    #[error("Failed to deserialize evaluator report")]
    Report(#[from] serde_yaml::Error),
}

/// Stages of the evaluation of a benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Confront,
    Limits,
    Score,
    Composite,
    Summarize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confront => "confront",
            Self::Limits => "limits",
            Self::Score => "score",
            Self::Composite => "composite",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the coordinator invokes, the analysis itself happens behind this boundary
pub trait Evaluator {
    /// evaluate a pair and persist its result artifact at `benchmark.artifact_path(model)`
    fn confront(&self, pair: Pair<'_>) -> Result<(), EvaluationError>;

    /// Compute cross model aggregates such as plot limits
    ///
    /// Called by every worker for every benchmark, so this must be idempotent.
    fn determine_plot_limits(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError>;

    /// overall score and per model output of an evaluated pair
    fn score(&self, pair: Pair<'_>) -> Result<Option<f64>, EvaluationError>;

    /// Composite plots and report fragment of a benchmark, only ever called on its master
    fn composite(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError>;

    /// run wide index and summary figure, called once on rank 0 after `scores` was written
    fn summarize(
        &self,
        benchmarks: &[BenchmarkEntry],
        models: &[ModelEntry],
        scores: &Path,
    ) -> Result<(), EvaluationError>;
}

/// Evaluators selectable from the configuration
///
/// Each benchmark carries its own `EvaluatorConfig`, dispatch happens per call.
#[derive(Debug, Clone, Default)]
pub struct Evaluators;

impl Evaluators {
    fn select(config: &EvaluatorConfig) -> exec::ExecEvaluator<'_> {
        match config {
            EvaluatorConfig::Exec { exec, params } => exec::ExecEvaluator::new(exec, params),
        }
    }
}

impl Evaluator for Evaluators {
    fn confront(&self, pair: Pair<'_>) -> Result<(), EvaluationError> {
        Self::select(&pair.benchmark.evaluator).confront(pair)
    }

    fn determine_plot_limits(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        Self::select(&benchmark.evaluator).determine_plot_limits(benchmark, models)
    }

    fn score(&self, pair: Pair<'_>) -> Result<Option<f64>, EvaluationError> {
        Self::select(&pair.benchmark.evaluator).score(pair)
    }

    fn composite(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        Self::select(&benchmark.evaluator).composite(benchmark, models)
    }

    fn summarize(
        &self,
        benchmarks: &[BenchmarkEntry],
        models: &[ModelEntry],
        scores: &Path,
    ) -> Result<(), EvaluationError> {
        // the summary belongs to the run, it is driven by the evaluator of the first benchmark
        match benchmarks.first() {
            Some(first) => Self::select(&first.evaluator).summarize(benchmarks, models, scores),
            None => Ok(()),
        }
    }
}
