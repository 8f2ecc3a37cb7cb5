use tracing::debug;

/// Environment variables of common launchers, as (rank, size) pairs
///
/// Workers started by `mpirun`/`mpiexec` (Open MPI, MPICH/Hydra) or `srun` learn their place in
/// the group from these, no MPI library is involved.
pub const LAUNCHER_VARIABLES: [(&str, &str); 4] = [
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
    ("PMIX_RANK", "PMIX_SIZE"),
    ("SLURM_PROCID", "SLURM_NTASKS"),
];

/// Place of this process in a group started by an external launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchContext {
    pub rank: usize,
    pub size: usize,
}

impl LaunchContext {
    /// detect rank and size from the process environment
    pub fn from_env() -> Option<Self> {
        Self::detect(|name| std::env::var(name).ok())
    }

    /// Detect rank and size with a custom variable lookup
    ///
    /// The first launcher whose variables are both present and valid wins.
    pub fn detect<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<Self> {
        LAUNCHER_VARIABLES
            .iter()
            .find_map(|(rank_variable, size_variable)| {
                let rank = lookup(rank_variable)?.trim().parse::<usize>().ok()?;
                let size = lookup(size_variable)?.trim().parse::<usize>().ok()?;

                if rank < size {
                    debug!(rank, size, launcher = rank_variable, "Detected launcher");

                    Some(Self { rank, size })
                } else {
                    None
                }
            })
    }
}
