use super::{
    check_lengths,
    util::{hostname, rename, strip_prefix, with_prefix},
    Communicator, SyncError,
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::{
    cell::Cell,
    ffi::{OsStr, OsString},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, trace, warn};

/// files are written under this prefix and renamed once complete
pub static PROCESSING_PREFIX: Lazy<OsString> = Lazy::new(|| {
    let mut string = OsString::new();
    string.push("[processing]_");
    string
});

/// the presence of this file in the rendezvous directory aborts the run
pub static ABORT_MARKER: Lazy<OsString> = Lazy::new(|| {
    let mut string = OsString::new();
    string.push("abort");
    string
});

/// `<LEFT_PREFIX><rank>` marks a rank that is done with every collective of the run
pub const LEFT_PREFIX: &str = "left.";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
    move |error| SyncError::Io {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

/// Collectives over a directory shared by all workers
///
/// Collective number `n` has every rank publish `<n>.<rank>` and wait for the files of all other
/// ranks. Publishing writes the file under `PROCESSING_PREFIX` first and then renames it, so a
/// file that is visible is also complete. All ranks issue the same sequence of collectives, which
/// keeps the sequence numbers in agreement without any communication.
#[derive(Debug)]
pub struct FsCommunicator {
    dir: PathBuf,
    rank: usize,
    size: usize,
    poll: Duration,
    sequence: Cell<u64>,
    host: String,
}

impl FsCommunicator {
    /// Join the group rendezvousing in `dir`
    ///
    /// Fails if the directory still contains files this rank published in an earlier run, reusing
    /// such a directory would mix up collectives of both runs. A run that called `leave` on every
    /// rank leaves nothing behind. After a crash or an abort, the directory has to be removed
    /// before its run id can be used again.
    pub fn join(
        dir: impl Into<PathBuf>,
        rank: usize,
        size: usize,
        poll: Duration,
    ) -> Result<Self, SyncError> {
        let dir = dir.into();

        if size == 0 || rank >= size {
            return Err(SyncError::InvalidGroup { rank, size });
        }

        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let communicator = Self {
            dir,
            rank,
            size,
            poll,
            sequence: Cell::new(0),
            host: hostname(),
        };

        if let Err(error) = communicator.check_abort() {
            if matches!(error, SyncError::Aborted(_)) {
                warn!(dir = ?communicator.dir, "Rendezvous directory holds an abort marker, remove it to reuse the run id");
            }

            return Err(error);
        }

        for entry in std::fs::read_dir(&communicator.dir).map_err(io_error(&communicator.dir))? {
            let name = entry.map_err(io_error(&communicator.dir))?.file_name();
            // an interrupted publish leaves its file behind under the processing prefix
            let name = strip_prefix(&name, &PROCESSING_PREFIX).unwrap_or(name);

            if owner(&name) == Some(rank) {
                return Err(SyncError::StaleRendezvous(communicator.dir.clone()));
            }
        }

        debug!(rank, size, dir = ?communicator.dir, host = %communicator.host, "Joined rendezvous directory");

        Ok(communicator)
    }

    fn collective_name(sequence: u64, rank: usize) -> String {
        format!("{sequence:06}.{rank}")
    }

    fn collective_path(&self, sequence: u64, rank: usize) -> PathBuf {
        self.dir.join(Self::collective_name(sequence, rank))
    }

    fn left_path(&self, rank: usize) -> PathBuf {
        self.dir.join(format!("{LEFT_PREFIX}{rank}"))
    }

    fn publish(&self, sequence: u64, values: &[u64]) -> Result<(), SyncError> {
        self.write(
            &Self::collective_name(sequence, self.rank),
            &format!("{}\n{}\n", self.host, values.iter().join(" ")),
        )
    }

    /// write `contents` to `name` in the rendezvous directory, readers never see a partial file
    fn write(&self, name: &str, contents: &str) -> Result<(), SyncError> {
        let processing = self.dir.join(with_prefix(&PROCESSING_PREFIX, OsStr::new(name)));
        let target = self.dir.join(name);

        std::fs::write(&processing, contents).map_err(io_error(&processing))?;

        rename(&processing, &target).map_err(io_error(&target))
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u64>>, SyncError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let mut lines = contents.lines();
                // first line holds the host name of the publisher
                let _host = lines.next();

                lines
                    .next()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::parse::<u64>)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Some)
                    .map_err(|_| SyncError::Corrupt(path.to_path_buf()))
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(io_error(path)(error)),
        }
    }

    fn check_abort(&self) -> Result<(), SyncError> {
        let marker = self.dir.join(ABORT_MARKER.as_os_str());

        match std::fs::read_to_string(&marker) {
            Ok(reason) => Err(SyncError::Aborted(reason.trim().to_owned())),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&marker)(error)),
        }
    }

    /// remove the file of an earlier collective, every rank is known to be done reading it
    fn cleanup(&self, sequence: u64) {
        remove(&self.collective_path(sequence, self.rank));
    }

    /// Leave the group once this rank is done with every collective
    ///
    /// Every rank publishes `left.<rank>`. Rank 0 waits for all of them and then removes the
    /// files of the last collective together with the marks, which leaves the directory empty for
    /// the next run using it.
    pub fn leave(self) -> Result<(), SyncError> {
        self.write(&format!("{LEFT_PREFIX}{}", self.rank), &format!("{}\n", self.host))?;

        if self.rank != 0 {
            debug!(rank = self.rank, "Left rendezvous directory");
            return Ok(());
        }

        while !(0..self.size).all(|rank| self.left_path(rank).is_file()) {
            self.check_abort()?;
            std::thread::sleep(self.poll);
        }

        if let Some(last) = self.sequence.get().checked_sub(1) {
            for rank in 0..self.size {
                remove(&self.collective_path(last, rank));
            }
        }
        for rank in 0..self.size {
            remove(&self.left_path(rank));
        }

        debug!(dir = ?self.dir, "All ranks left, cleaned up rendezvous directory");

        Ok(())
    }
}

fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => trace!(path = ?path, "Removed rendezvous file"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!(path = ?path, "Failed to remove rendezvous file: {error}"),
    }
}

/// split `<sequence>.<rank>` into its parts
fn parse_collective_name(name: &OsStr) -> Option<(u64, usize)> {
    let name = name.to_str()?;
    let (sequence, rank) = name.split_once('.')?;

    Some((sequence.parse().ok()?, rank.parse().ok()?))
}

/// rank which published `name`, either a collective or the mark of a rank that left
fn owner(name: &OsStr) -> Option<usize> {
    match parse_collective_name(name) {
        Some((_, rank)) => Some(rank),
        None => name.to_str()?.strip_prefix(LEFT_PREFIX)?.parse().ok(),
    }
}

impl Communicator for FsCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&self, values: &[u64]) -> Result<Vec<Vec<u64>>, SyncError> {
        self.check_abort()?;

        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);

        self.publish(sequence, values)?;

        let mut gathered: Vec<Option<Vec<u64>>> = vec![None; self.size];

        loop {
            for (rank, slot) in gathered.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = self.read(&self.collective_path(sequence, rank))?;
                }
            }

            if gathered.iter().all(Option::is_some) {
                break;
            }

            self.check_abort()?;
            std::thread::sleep(self.poll);
        }

        // all ranks published `sequence`, so all of them are done with the previous collective
        if sequence > 0 {
            self.cleanup(sequence - 1);
        }

        let gathered = gathered.into_iter().flatten().collect_vec();
        check_lengths(&gathered)?;

        trace!(rank = self.rank, sequence, "Completed collective");

        Ok(gathered)
    }

    fn abort(&self, reason: &str) {
        let name = format!("abort.{}", self.rank);
        let processing = self.dir.join(with_prefix(&PROCESSING_PREFIX, OsStr::new(&name)));
        let marker = self.dir.join(ABORT_MARKER.as_os_str());

        error!(rank = self.rank, "Aborting all workers: {reason}");

        // the marker has a fixed name, so it cannot go through `write`
        let result = std::fs::write(
            &processing,
            format!("rank {} ({}): {reason}\n", self.rank, self.host),
        )
        .and_then(|()| rename(&processing, &marker));

        if let Err(error) = result {
            error!(error = ?error, marker = ?marker, "Failed to write abort marker, other workers might hang");
        }
    }
}
