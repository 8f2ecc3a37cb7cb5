pub mod sqlite;

pub use sqlite::Ledger;

use crate::evaluation::Failure;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error")]
    SQLite(#[from] rusqlite::Error),
    #[error("Failed to create ledger directory {0:?}")]
    Directory(PathBuf, #[source] std::io::Error),
    #[error("Unknown pair status {0} in ledger")]
    UnknownStatus(i8),
    #[error("Unknown failure kind {0} in ledger")]
    UnknownFailure(String),
}

/// Result of evaluating a pair in the first phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum PairStatus {
    Failed = -1,
    Cached = 0,
    Completed = 1,
}

impl TryFrom<i8> for PairStatus {
    type Error = LedgerError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Failed),
            0 => Ok(Self::Cached),
            1 => Ok(Self::Completed),
            unknown => Err(LedgerError::UnknownStatus(unknown)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairOutcome {
    pub model: String,
    pub benchmark: String,
    pub status: PairStatus,
    // only measured for pairs which were actually evaluated
    pub runtime: Option<Duration>,
    pub failure: Option<Failure>,
}

impl PairOutcome {
    pub fn cached(model: &str, benchmark: &str) -> Self {
        Self {
            model: model.to_owned(),
            benchmark: benchmark.to_owned(),
            status: PairStatus::Cached,
            runtime: None,
            failure: None,
        }
    }

    pub fn completed(model: &str, benchmark: &str, runtime: Duration) -> Self {
        Self {
            model: model.to_owned(),
            benchmark: benchmark.to_owned(),
            status: PairStatus::Completed,
            runtime: Some(runtime),
            failure: None,
        }
    }

    pub fn failed(model: &str, benchmark: &str, runtime: Duration, failure: Failure) -> Self {
        Self {
            model: model.to_owned(),
            benchmark: benchmark.to_owned(),
            status: PairStatus::Failed,
            runtime: Some(runtime),
            failure: Some(failure),
        }
    }
}

/// Overall score of a pair, `None` if the pair has no score (e.g., its evaluation failed)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub model: String,
    pub benchmark: String,
    pub score: Option<f64>,
}

/// location of the ledger written by `rank`
pub fn ledger_path(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("rank-{rank:04}.db"))
}
