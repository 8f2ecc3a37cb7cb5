pub mod election;
pub mod fs;
pub mod local;
pub mod mpi;
pub mod util;


use std::path::PathBuf;
use thiserror::Error;

/*
 * Workers run in lockstep (SPMD): every worker walks through the same sequence of collectives,
 * and no worker leaves a collective before all workers entered it.
 *
 * Two transports exist:
 * -> threads of a single process sharing memory (`local::LocalGroup`)
 * -> processes sharing a directory, e.g., started by mpirun or srun (`fs::FsCommunicator`)
 *
 * A worker that runs into a fatal error calls `abort`, every other worker fails its current or
 * next collective instead of waiting forever.
 */

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Run was aborted: {0}")]
    Aborted(String),
    #[error("Rank {rank} contributed {actual} values, expected {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid group: rank {rank} with size {size}")]
    InvalidGroup { rank: usize, size: usize },
    #[error("Rendezvous directory {0:?} contains files of an earlier run, remove it or use another run id")]
    StaleRendezvous(PathBuf),
    #[error("Corrupt rendezvous file {0:?}")]
    Corrupt(PathBuf),
    #[error("Rendezvous I/O failed for {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Collective operations of a fixed group of workers
pub trait Communicator {
    /// rank of this worker, `0..size`
    fn rank(&self) -> usize;

    /// number of workers in the group
    fn size(&self) -> usize;

    /// Exchange `values` with every worker
    ///
    /// Returns the contributions of all workers ordered by rank. Every worker has to contribute
    /// the same number of values.
    fn all_gather(&self, values: &[u64]) -> Result<Vec<Vec<u64>>, SyncError>;

    /// wait until every worker reached the barrier
    fn barrier(&self) -> Result<(), SyncError> {
        self.all_gather(&[]).map(|_| ())
    }

    /// Make every pending and future collective of the group fail with `SyncError::Aborted`
    fn abort(&self, reason: &str);
}

/// check that all contributions to a collective share the same length
pub(crate) fn check_lengths(gathered: &[Vec<u64>]) -> Result<(), SyncError> {
    let expected = gathered.first().map_or(0, Vec::len);

    match gathered
        .iter()
        .enumerate()
        .find(|(_, values)| values.len() != expected)
    {
        Some((rank, values)) => Err(SyncError::LengthMismatch {
            rank,
            expected,
            actual: values.len(),
        }),
        None => Ok(()),
    }
}
