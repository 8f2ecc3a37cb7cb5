use super::{LedgerError, PairOutcome, PairStatus, ScoreRecord};
use crate::evaluation::{Failure, FailureKind};
use rusqlite::{params, Connection};
use std::{path::Path, time::Duration};
use tracing::{debug, error};

/// Per rank record of the outcome and score of every local pair
///
/// Every rank writes its own file, so no two processes ever write the same database. Rank 0 reads
/// all of them once every rank passed the last barrier of the post-processing.
#[derive(Debug)]
pub struct Ledger {
    connection: Connection,
}

impl Ledger {
    /// Create or reset the ledger at `path`, entries of an earlier run are dropped
    pub fn create(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| LedgerError::Directory(parent.to_path_buf(), error))?;
        }

        let ledger = Self {
            connection: Connection::open(path)?,
        };
        ledger.init()?;

        for table in ["outcomes", "scores"] {
            let removed = ledger
                .connection
                .execute(&format!("delete from {table}"), [])?;

            if removed > 0 {
                debug!(table, removed, "Dropped entries of an earlier run");
            }
        }

        Ok(ledger)
    }

    /// open an existing ledger for reading
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let ledger = Self {
            connection: Connection::open(path)?,
        };
        ledger.init()?;

        Ok(ledger)
    }

    fn init(&self) -> Result<(), LedgerError> {
        let mut counter = 1;

        for table in SQL_SCHEMA {
            match self.connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(LedgerError::SQLite(error));
                }
            };

            counter += 1;
        }

        Ok(())
    }

    pub fn record_outcome(&self, outcome: &PairOutcome) -> Result<i64, LedgerError> {
        debug!("Inserting {outcome:?}...");

        let id = self
            .connection
            .prepare_cached(
                "insert into outcomes
                 (model, benchmark, status, runtime_ms, failure_kind, failure_message)
                 values (?, ?, ?, ?, ?, ?) returning id",
            )?
            .query_row(
                params![
                    outcome.model,
                    outcome.benchmark,
                    outcome.status as i8,
                    outcome
                        .runtime
                        .map(|runtime| i64::try_from(runtime.as_millis()).unwrap_or(i64::MAX)),
                    outcome.failure.as_ref().map(|failure| failure.kind.as_str()),
                    outcome
                        .failure
                        .as_ref()
                        .map(|failure| failure.message.as_str()),
                ],
                |row| row.get(0),
            )?;

        Ok(id)
    }

    pub fn record_score(
        &self,
        model: &str,
        benchmark: &str,
        score: Option<f64>,
    ) -> Result<(), LedgerError> {
        self.connection
            .prepare_cached(
                "insert or replace into scores (model, benchmark, score) values (?, ?, ?)",
            )?
            .execute(params![model, benchmark, score])?;

        Ok(())
    }

    pub fn outcomes(&self) -> Result<Vec<PairOutcome>, LedgerError> {
        self.connection
            .prepare_cached(
                "select model, benchmark, status, runtime_ms, failure_kind, failure_message
                 from outcomes order by id",
            )?
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .map(|result| -> Result<PairOutcome, LedgerError> {
                let (model, benchmark, status, runtime, kind, message) = result?;

                let failure = match kind {
                    Some(kind) => Some(Failure::new(
                        FailureKind::parse(&kind).ok_or(LedgerError::UnknownFailure(kind))?,
                        message.unwrap_or_default(),
                    )),
                    None => None,
                };

                Ok(PairOutcome {
                    model,
                    benchmark,
                    status: PairStatus::try_from(status)?,
                    runtime: runtime.map(|millis| Duration::from_millis(millis.max(0) as u64)),
                    failure,
                })
            })
            .collect()
    }

    pub fn scores(&self) -> Result<Vec<ScoreRecord>, LedgerError> {
        self.connection
            .prepare_cached("select model, benchmark, score from scores order by id")?
            .query_map(params![], |row| {
                Ok(ScoreRecord {
                    model: row.get(0)?,
                    benchmark: row.get(1)?,
                    score: row.get(2)?,
                })
            })?
            .map(|result| result.map_err(LedgerError::from))
            .collect()
    }

    pub fn close(mut self) -> Result<(), LedgerError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close ledger");

                return Err(LedgerError::SQLite(error));
            }
        }

        debug!("Closed ledger");

        Ok(())
    }
}

pub const SQL_SCHEMA: [&str; 2] = [
    "create table if not exists outcomes (
    id integer primary key,
    model text not null,
    benchmark text not null,
    status tinyint not null,
    runtime_ms integer,
    failure_kind text,
    failure_message text
);",
    "create table if not exists scores (
    id integer primary key,
    model text not null,
    benchmark text not null,
    score real,
    unique (model, benchmark)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
