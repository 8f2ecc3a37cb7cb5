use super::{check_lengths, Communicator, SyncError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{error, trace};

#[derive(Debug)]
struct State {
    // incremented every time a collective completes
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Vec<u64>>>,
    // result of the last completed collective, stays valid until every worker entered the next one
    gathered: Arc<Vec<Vec<u64>>>,
    aborted: Option<String>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

/// A group of workers living as threads inside of one process
#[derive(Debug)]
pub struct LocalGroup;

impl LocalGroup {
    /// create one communicator per rank, each one is supposed to be moved to its own thread
    pub fn create(size: usize) -> Result<Vec<LocalCommunicator>, SyncError> {
        if size == 0 {
            return Err(SyncError::InvalidGroup { rank: 0, size });
        }

        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                slots: vec![None; size],
                gathered: Arc::new(Vec::new()),
                aborted: None,
            }),
            condvar: Condvar::new(),
        });

        Ok((0..size)
            .map(|rank| LocalCommunicator {
                rank,
                shared: shared.clone(),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather(&self, values: &[u64]) -> Result<Vec<Vec<u64>>, SyncError> {
        let mut state = self.shared.state.lock();

        if let Some(reason) = &state.aborted {
            return Err(SyncError::Aborted(reason.clone()));
        }

        let generation = state.generation;
        state.slots[self.rank] = Some(values.to_vec());
        state.arrived += 1;

        if state.arrived == self.shared.size {
            let gathered = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect::<Vec<_>>();

            state.arrived = 0;
            state.generation += 1;
            state.gathered = Arc::new(gathered);
            self.shared.condvar.notify_all();

            trace!(rank = self.rank, generation, "Completed collective");
        } else {
            while state.generation == generation {
                if let Some(reason) = &state.aborted {
                    return Err(SyncError::Aborted(reason.clone()));
                }

                self.shared.condvar.wait(&mut state);
            }
        }

        let gathered = state.gathered.clone();
        drop(state);

        check_lengths(&gathered)?;

        Ok(gathered.as_ref().clone())
    }

    fn abort(&self, reason: &str) {
        let mut state = self.shared.state.lock();

        if state.aborted.is_none() {
            error!(rank = self.rank, "Aborting all workers: {reason}");
            state.aborted = Some(format!("rank {}: {reason}", self.rank));
        }

        self.shared.condvar.notify_all();
    }
}

/// Aborts the group if the owning thread unwinds, so that a panicking worker can't leave the
/// remaining workers waiting in a collective
pub struct AbortOnPanic<'a, C: Communicator>(pub &'a C);

impl<C: Communicator> Drop for AbortOnPanic<'_, C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort("worker panicked");
        }
    }
}
