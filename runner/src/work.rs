use crate::{benchmark::BenchmarkEntry, model::ModelEntry};
use itertools::{iproduct, Itertools};
use std::ops::Range;

/// One (model, benchmark) pair, as indices into the replicated model and benchmark lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub model: usize,
    pub benchmark: usize,
}

/// Borrowed view of a work item, handed to evaluators
#[derive(Debug, Clone, Copy)]
pub struct Pair<'a> {
    pub model: &'a ModelEntry,
    pub benchmark: &'a BenchmarkEntry,
}

impl WorkItem {
    pub fn resolve<'a>(
        &self,
        models: &'a [ModelEntry],
        benchmarks: &'a [BenchmarkEntry],
    ) -> Pair<'a> {
        Pair {
            model: &models[self.model],
            benchmark: &benchmarks[self.benchmark],
        }
    }
}

/// Build the global work list
///
/// Benchmarks vary slower than models (all models of the first benchmark, then all models of the
/// second, ...) which keeps the pairs of a benchmark next to each other and lets the partition
/// hand them to as few workers as possible.
pub fn cross_join(models: usize, benchmarks: usize) -> Vec<WorkItem> {
    iproduct!(0..benchmarks, 0..models)
        .map(|(benchmark, model)| WorkItem { model, benchmark })
        .collect_vec()
}

/// Bounds of the slice owned by `rank` in a list of `total` items split over `size` workers
///
/// Slice boundaries are `rank * total / size` rounded to the nearest integer, halves rounding up.
/// Consecutive ranks share a boundary, so the slices cover the list exactly once. Their lengths
/// differ by at most one, and the longer slices are spread over the ranks instead of piling up at
/// either end.
pub fn partition_bounds(total: usize, size: usize, rank: usize) -> Option<Range<usize>> {
    if size == 0 || rank >= size {
        return None;
    }

    // round(r * N / P) == floor((2 * r * N + P) / (2 * P))
    let boundary = |rank: usize| {
        ((2 * rank as u128 * total as u128 + size as u128) / (2 * size as u128)) as usize
    };

    Some(boundary(rank)..boundary(rank + 1))
}

/// The contiguous part of `work` owned by `rank`
pub fn local_slice(work: &[WorkItem], size: usize, rank: usize) -> &[WorkItem] {
    match partition_bounds(work.len(), size, rank) {
        Some(range) => &work[range],
        None => &[],
    }
}
