use crate::config::{EvaluatorConfig, RunnerConfig};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::ModelEntry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BenchmarkError {
    #[error("Master flag of {0} was already set by an earlier election")]
    MasterAlreadySet(String),
    #[error("Benchmark {0} has no evaluator")]
    MissingEvaluator(String),
}

/// Reference from one benchmark to another, resolved by case-insensitive longname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
    Resolved {
        longname: String,
        output: PathBuf,
    },
    // kept around to report it, nothing in the benchmark list matched
    Unresolved(String),
}

/// A benchmark definition, replicated identically on every worker
///
/// The only state that changes after construction is the master flag, which is written exactly
/// once by the master election of the owning worker.
#[derive(Debug, Clone)]
pub struct BenchmarkEntry {
    pub longname: String,
    pub name: String,
    pub output: PathBuf,
    pub relationships: Vec<Relationship>,
    pub regions: Vec<String>,
    pub artifact_extension: String,
    pub evaluator: EvaluatorConfig,
    master: OnceCell<bool>,
}

impl BenchmarkEntry {
    pub fn new(
        longname: impl Into<String>,
        name: impl Into<String>,
        output: PathBuf,
        evaluator: EvaluatorConfig,
    ) -> Self {
        Self {
            longname: longname.into(),
            name: name.into(),
            output,
            relationships: Vec::new(),
            regions: vec!["global".to_owned()],
            artifact_extension: "nc".to_owned(),
            evaluator,
            master: OnceCell::new(),
        }
    }

    /// deterministic location of the result artifact of a (benchmark, model) pair
    pub fn artifact_path(&self, model: &ModelEntry) -> PathBuf {
        self.output.join(format!(
            "{}_{}.{}",
            self.name, model.name, self.artifact_extension
        ))
    }

    /// `None` until the master election ran on this worker
    pub fn master(&self) -> Option<bool> {
        self.master.get().copied()
    }

    pub fn is_master(&self) -> bool {
        self.master().unwrap_or(false)
    }

    pub(crate) fn set_master(&self, is_master: bool) -> Result<(), BenchmarkError> {
        self.master
            .set(is_master)
            .map_err(|_| BenchmarkError::MasterAlreadySet(self.longname.clone()))
    }

    /// copy of the entry with an unset master flag, used to replicate the list for another worker
    pub fn replicate(&self) -> Self {
        Self {
            master: OnceCell::new(),
            ..self.clone()
        }
    }
}

/// Build the benchmark list from the configuration, in configuration order
pub fn load_benchmarks(
    config: &RunnerConfig,
    build_dir: &Path,
) -> Result<Vec<BenchmarkEntry>, BenchmarkError> {
    let benchmarks = config
        .benchmarks
        .iter()
        .map(|benchmark| {
            let evaluator = config
                .evaluator_for(benchmark)
                .cloned()
                .ok_or_else(|| BenchmarkError::MissingEvaluator(benchmark.longname.clone()))?;

            let mut entry = BenchmarkEntry::new(
                benchmark.longname.clone(),
                benchmark.short_name(),
                build_dir.join(benchmark.output_dir()),
                evaluator,
            );
            entry.regions = config.regions.clone();
            entry.artifact_extension = config.artifact_extension.clone();
            entry.relationships = benchmark
                .relationships
                .iter()
                .cloned()
                .map(Relationship::Unresolved)
                .collect();

            Ok(entry)
        })
        .collect::<Result<Vec<_>, BenchmarkError>>()?;

    Ok(match_relationships(benchmarks))
}

/// Link relationship longnames to the benchmark they name
///
/// Matching is case-insensitive and runs against the full list, so a relationship may point to a
/// benchmark that is later removed by `filter_benchmarks`.
pub fn match_relationships(mut benchmarks: Vec<BenchmarkEntry>) -> Vec<BenchmarkEntry> {
    let targets = benchmarks
        .iter()
        .map(|benchmark| {
            (
                benchmark.longname.to_lowercase(),
                Relationship::Resolved {
                    longname: benchmark.longname.clone(),
                    output: benchmark.output.clone(),
                },
            )
        })
        .collect::<Vec<_>>();

    for benchmark in benchmarks.iter_mut() {
        for relationship in benchmark.relationships.iter_mut() {
            if let Relationship::Unresolved(longname) = relationship {
                let wanted = longname.to_lowercase();

                match targets.iter().find(|(candidate, _)| *candidate == wanted) {
                    Some((_, target)) => {
                        debug!(benchmark = %benchmark.longname, related = %longname, "Linked relationship");
                        *relationship = target.clone();
                    }
                    None => {
                        warn!(benchmark = %benchmark.longname, related = %longname, "Relationship does not match any benchmark");
                    }
                }
            }
        }
    }

    benchmarks
}

/// Keep only benchmarks whose longname contains at least one of the given substrings
///
/// An empty filter keeps everything. Each benchmark is kept at most once, in its original order.
pub fn filter_benchmarks<S: AsRef<str>>(
    benchmarks: Vec<BenchmarkEntry>,
    filters: &[S],
) -> Vec<BenchmarkEntry> {
    if filters.is_empty() {
        return benchmarks;
    }

    benchmarks
        .into_iter()
        .filter(|benchmark| {
            filters
                .iter()
                .any(|filter| benchmark.longname.contains(filter.as_ref()))
        })
        .collect()
}
