use crate::{
    benchmark::BenchmarkEntry,
    database::{ledger_path, Ledger, LedgerError, PairOutcome, PairStatus, ScoreRecord},
    model::ModelEntry,
};
use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScoreboardError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Failed to write score table")]
    Csv(#[from] csv::Error),
    #[error("Failed to write score table to {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Overall scores of all pairs, one row per model and one column per benchmark
#[derive(Debug, Clone)]
pub struct Scoreboard {
    models: Vec<String>,
    benchmarks: Vec<String>,
    scores: HashMap<(String, String), f64>,
    // pairs whose evaluation failed, in rank order
    failures: Vec<PairOutcome>,
}

impl Scoreboard {
    pub fn new(models: &[ModelEntry], benchmarks: &[BenchmarkEntry]) -> Self {
        Self {
            models: models.iter().map(|model| model.name.clone()).collect(),
            benchmarks: benchmarks
                .iter()
                .map(|benchmark| benchmark.longname.clone())
                .collect(),
            scores: HashMap::new(),
            failures: Vec::new(),
        }
    }

    /// Read the ledgers of ranks `0..size` from `dir`
    ///
    /// Must only be called after every rank passed the barrier following its last score.
    pub fn merge(
        dir: &Path,
        size: usize,
        models: &[ModelEntry],
        benchmarks: &[BenchmarkEntry],
    ) -> Result<Self, ScoreboardError> {
        let mut scoreboard = Self::new(models, benchmarks);

        for rank in 0..size {
            let ledger = Ledger::open(&ledger_path(dir, rank))?;
            let records = ledger.scores()?;
            let outcomes = ledger.outcomes()?;
            ledger.close()?;

            debug!(rank, records = records.len(), outcomes = outcomes.len(), "Merging ledger");

            for record in records {
                scoreboard.insert(record);
            }
            scoreboard.failures.extend(
                outcomes
                    .into_iter()
                    .filter(|outcome| outcome.status == PairStatus::Failed),
            );
        }

        info!(
            scores = scoreboard.scores.len(),
            pairs = scoreboard.models.len() * scoreboard.benchmarks.len(),
            failed = scoreboard.failures.len(),
            "Merged scores of {size} worker(s)"
        );

        Ok(scoreboard)
    }

    pub fn insert(&mut self, record: ScoreRecord) {
        if let Some(score) = record.score {
            let key = (record.model, record.benchmark);

            // every pair lives in exactly one partition
            if self.scores.insert(key.clone(), score).is_some() {
                warn!(model = %key.0, benchmark = %key.1, "Pair was scored more than once");
            }
        }
    }

    pub fn failures(&self) -> &[PairOutcome] {
        &self.failures
    }

    /// log every failed pair once, so a run ends with the list of what is missing
    pub fn report_failures(&self) {
        for outcome in self.failures() {
            match &outcome.failure {
                Some(failure) => warn!(
                    model = %outcome.model,
                    benchmark = %outcome.benchmark,
                    kind = %failure.kind,
                    "Pair failed: {}",
                    failure.message
                ),
                None => warn!(model = %outcome.model, benchmark = %outcome.benchmark, "Pair failed"),
            }
        }
    }

    pub fn get(&self, model: &str, benchmark: &str) -> Option<f64> {
        self.scores
            .get(&(model.to_owned(), benchmark.to_owned()))
            .copied()
    }

    /// write the table as CSV, pairs without a score are left empty
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ScoreboardError> {
        let mut writer = csv::Writer::from_writer(writer);

        writer.write_record(
            std::iter::once("Model").chain(self.benchmarks.iter().map(String::as_str)),
        )?;

        for model in self.models.iter() {
            let row = std::iter::once(model.clone()).chain(self.benchmarks.iter().map(
                |benchmark| {
                    self.get(model, benchmark)
                        .map(|score| score.to_string())
                        .unwrap_or_default()
                },
            ));

            writer.write_record(row)?;
        }

        writer
            .flush()
            .map_err(|error| ScoreboardError::Csv(error.into()))?;

        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<(), ScoreboardError> {
        let file = std::fs::File::create(path)
            .map_err(|error| ScoreboardError::Io(path.to_path_buf(), error))?;

        self.write_csv(file)?;
        info!(path = ?path, "Wrote score table");

        Ok(())
    }
}

#[cfg(test)]
mod scoreboard_test;
