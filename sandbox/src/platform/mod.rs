//! Platform adapters.
//!
//! The rest of the crate is written against the small interface exposed by
//! this module: `spawn`, `sample`, `terminate` and `reap`. Everything that
//! differs between the Windows family (suspending error dialogs, high
//! priority process creation, working-set hints, peak-working-set queries,
//! process-times queries) and the POSIX family (`fork`/`execve`, `waitpid`,
//! procfs-based RSS/utime sampling, tick/page-size multipliers) lives behind
//! this module boundary. Only one of the two sibling modules is compiled in
//! any given build.

use crate::{ProcessBuilder, ProcessResourceUsage, Result};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::{Pid, RawExit, SpawnedProcess};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::{Pid, RawExit, SpawnedProcess};

/// Outcome of a single, non-blocking sampling pass over a running child.
pub enum SampleOutcome {
    /// The child is still alive; carries the freshest resource usage
    /// snapshot available.
    Alive(ProcessResourceUsage),

    /// The child has already terminated.
    Exited(RawExit),
}

/// Launch `spec` in the current platform's native fashion and return a
/// handle that the rest of this module's functions operate on.
pub fn spawn(spec: ProcessBuilder) -> Result<SpawnedProcess> {
    #[cfg(unix)]
    {
        self::unix::spawn(spec)
    }
    #[cfg(windows)]
    {
        self::windows::spawn(spec)
    }
}

/// Take one non-blocking sample of `handle`: check whether the child has
/// exited and, if not, refresh its resource usage.
pub fn sample(handle: &SpawnedProcess) -> Result<SampleOutcome> {
    #[cfg(unix)]
    {
        self::unix::sample(handle)
    }
    #[cfg(windows)]
    {
        self::windows::sample(handle)
    }
}

/// Forcibly terminate the child referred to by `handle`. Idempotent: calling
/// this on an already-exited child is not an error.
pub fn terminate(handle: &SpawnedProcess) -> Result<()> {
    #[cfg(unix)]
    {
        self::unix::terminate(handle)
    }
    #[cfg(windows)]
    {
        self::windows::terminate(handle)
    }
}

/// Block until the child referred to by `handle` has exited and return its
/// raw exit classification. Used to obtain a final, authoritative status
/// after `terminate` has been called.
pub fn reap(handle: &SpawnedProcess) -> Result<RawExit> {
    #[cfg(unix)]
    {
        self::unix::reap(handle)
    }
    #[cfg(windows)]
    {
        self::windows::reap(handle)
    }
}
