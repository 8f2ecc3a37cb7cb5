use super::{Communicator, SyncError};
use crate::{
    benchmark::{BenchmarkEntry, BenchmarkError},
    work::WorkItem,
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Failed to exchange work counts")]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
}

/// number of local work items per benchmark
pub fn local_counts(local: &[WorkItem], benchmarks: usize) -> Vec<u64> {
    let mut counts = vec![0; benchmarks];

    for item in local {
        counts[item.benchmark] += 1;
    }

    counts
}

/// Index of the first maximum, so that ties go to the lowest rank
///
/// An empty or all-zero vector yields rank 0.
pub fn first_argmax<I: IntoIterator<Item = u64>>(counts: I) -> usize {
    let mut best = (0, 0);

    for (rank, count) in counts.into_iter().enumerate() {
        if count > best.1 {
            best = (rank, count);
        }
    }

    best.0
}

/// Determine the master rank of every benchmark and set the master flags of this worker
///
/// Every worker contributes its local counts to a single all-gather and then runs the same
/// tie-break on the same data, so all workers agree on the masters without another round of
/// communication. Returns the master rank per benchmark.
pub fn elect_masters<C: Communicator>(
    communicator: &C,
    benchmarks: &[BenchmarkEntry],
    local: &[WorkItem],
) -> Result<Vec<usize>, ElectionError> {
    let counts = local_counts(local, benchmarks.len());
    let gathered = communicator.all_gather(&counts)?;

    let masters = (0..benchmarks.len())
        .map(|benchmark| first_argmax(gathered.iter().map(|counts| counts[benchmark])))
        .collect::<Vec<_>>();

    for (benchmark, master) in benchmarks.iter().zip(masters.iter()) {
        let is_master = *master == communicator.rank();
        benchmark.set_master(is_master)?;

        if is_master {
            debug!(rank = communicator.rank(), benchmark = %benchmark.longname, "Elected as master");
        }
    }

    Ok(masters)
}
