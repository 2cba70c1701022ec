//! This crate implements a sandbox for the judge. The sandbox is responsible
//! for executing a contestant's program in a monitored environment and
//! reporting back its resource usage and exit status.
//!
//! The sandbox implements:
//!
//! * Normal process operations: create, start, monitor and kill a process;
//!
//! * Resource limits: CPU time limits, real (wall-clock) time limits and
//! memory limits, enforced by actively sampling the child's resource usage
//! from a daemon thread rather than relying solely on OS-level kill timers;
//!
//! * Redirections: redirects stdin, stdout and stderr of child processes to
//! specific files.
//!
//! The threat model is accidental misbehavior of contestant code, not
//! malice: this crate deliberately does not implement syscall filtering,
//! chroots or user namespaces. See `judge` for the layer that turns the
//! vocabulary defined here into contest-scoring verdicts.
//!

#[macro_use]
extern crate error_chain;

mod daemon;
mod misc;
mod platform;
mod rlimits;

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use daemon::{DaemonThreadJoinHandle, ProcessDaemonContext};
pub use platform::Pid;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        InvalidProcessArgument(arg: String) {
            description("invalid argv")
            display("invalid argument for child process: {:?}", arg)
        }

        InvalidEnvironmentVariable(var: String) {
            description("invalid env")
            display("invalid environment variable for child process: {:?}", var)
        }

        ChildStartupFailed(reason: String) {
            description("failed to launch child process")
            display("failed to launch child process: {}", reason)
        }

        DaemonJoinFailed {
            description("failed to join the daemon thread")
        }
    }
}

/// Measurement of the size of a block of memory.
#[derive(Clone, Copy, Debug, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemorySize {
    /// Measurement in bytes.
    Bytes(usize),

    /// Measurement in kilobytes.
    KiloBytes(usize),

    /// Measurement in megabytes.
    MegaBytes(usize),

    /// Measurement in gigabytes.
    GigaBytes(usize),
}

impl MemorySize {
    /// Convert the current measurement to memory size in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            MemorySize::Bytes(s) => *s,
            MemorySize::KiloBytes(s) => s * 1024,
            MemorySize::MegaBytes(s) => s * 1024 * 1024,
            MemorySize::GigaBytes(s) => s * 1024 * 1024 * 1024,
        }
    }
}

impl PartialEq for MemorySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MemorySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemorySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl From<usize> for MemorySize {
    fn from(value: usize) -> MemorySize {
        MemorySize::Bytes(value)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySize::Bytes(s) => f.write_fmt(format_args!("{} B", s)),
            MemorySize::KiloBytes(s) => f.write_fmt(format_args!("{} KB", s)),
            MemorySize::MegaBytes(s) => f.write_fmt(format_args!("{} MB", s)),
            MemorySize::GigaBytes(s) => f.write_fmt(format_args!("{} GB", s)),
        }
    }
}

/// Specify limits on time and memory resources for a sandboxed process.
///
/// All three limits are optional. `None` means the corresponding resource is
/// not watched by the daemon thread at all (as opposed to watched but
/// generously large).
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessResourceLimits {
    /// Limit on CPU time (user + kernel) available for the child process.
    pub cpu_time_limit: Option<Duration>,

    /// Limit on wall-clock (real) time available for the child process.
    pub real_time_limit: Option<Duration>,

    /// Limit on peak resident memory available for the child process.
    pub memory_limit: Option<MemorySize>,
}

/// Specify redirections of standard streams. A `None` field leaves the
/// corresponding stream connected to the null device.
#[derive(Default)]
pub struct ProcessRedirection {
    /// Redirected `stdin`, or `None` if `stdin` should read from the null
    /// device.
    pub stdin: Option<File>,

    /// Redirected `stdout`, or `None` if `stdout` should be discarded.
    pub stdout: Option<File>,

    /// Redirected `stderr`, or `None` if `stderr` should be discarded.
    pub stderr: Option<File>,
}

/// Provide mechanism to build and launch a child process in a monitored
/// environment.
pub struct ProcessBuilder {
    /// Path to the executable file.
    file: PathBuf,

    /// Arguments passed to the child process.
    args: Vec<String>,

    /// Environment variables passed to the child process.
    envs: Vec<(String, String)>,

    /// Working directory of the child process.
    pub working_dir: Option<PathBuf>,

    /// Limits to be applied to the new child process, enforced by the daemon
    /// thread that samples the process's resource usage.
    pub limits: ProcessResourceLimits,

    /// Whether to additionally use the native OS `rlimit` (POSIX) mechanism
    /// as a hard backstop underneath the sampled limits above. When set, the
    /// child is killed by the kernel itself if it blows through the CPU time
    /// or address space limit between two samples; the daemon thread's own
    /// accounting remains the source of truth for the reported usage. Has no
    /// effect on the wall-clock limit, which is always daemon-enforced.
    pub use_native_rlimit: bool,

    /// Redirections to be applied to the new child process.
    pub redirections: ProcessRedirection,
}

impl ProcessBuilder {
    /// Create a new `ProcessBuilder` instance, given the executable file's
    /// path.
    pub fn new<P: AsRef<Path>>(file: P) -> ProcessBuilder {
        ProcessBuilder {
            file: file.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,

            limits: ProcessResourceLimits::default(),
            use_native_rlimit: false,
            redirections: ProcessRedirection::default(),
        }
    }

    /// Get the executable file path of the child process.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Get the argument vector of the child process.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment variables to be passed to the child process.
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Add an argument to the child process. If the given argument is not a
    /// valid C-style string, then returns `Err(e)` where the error kind of
    /// `e` is `ErrorKind::InvalidProcessArgument`.
    pub fn add_arg<S: Into<String>>(&mut self, arg: S) -> Result<()> {
        let arg = arg.into();
        if misc::is_valid_c_string(&arg) {
            self.args.push(arg);
            Ok(())
        } else {
            bail!(ErrorKind::InvalidProcessArgument(arg));
        }
    }

    /// Add an environment variable to the child process.
    pub fn add_env<S: Into<String>>(&mut self, name: S, value: S) -> Result<()> {
        let name = name.into();
        let value = value.into();
        if !misc::is_valid_c_string(&name) || name.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(name));
        }
        if !misc::is_valid_c_string(&value) {
            bail!(ErrorKind::InvalidEnvironmentVariable(value));
        }

        self.envs.push((name, value));
        Ok(())
    }

    /// Add all environment variables in the calling process to the
    /// environment variables of the child process.
    pub fn inherit_envs(&mut self) {
        for (name, value) in std::env::vars() {
            self.add_env(name, value)
                .expect("invalid environment variable in current process.");
        }
    }

    /// Start the process in a monitored environment. Spawning and the
    /// initial bookkeeping happen on the calling thread; a daemon thread is
    /// then spun up to sample the child's resource usage and enforce the
    /// configured limits.
    pub fn start(self) -> Result<Process> {
        log::trace!(
            "starting child process {:?} with args {:?}",
            self.file, self.args
        );

        let limits = self.limits;
        let spawned = platform::spawn(self)?;

        Ok(Process::attach(spawned, limits))
    }
}

/// Exit status of a sandboxed process, as classified by the daemon thread.
#[derive(Clone, Debug)]
pub enum ProcessExitStatus {
    /// The process has not exited yet.
    NotExited,

    /// The process exited normally with the given exit code.
    Normal(i32),

    /// The process was killed by the delivery of a signal (POSIX only; never
    /// produced on Windows).
    KilledBySignal(i32),

    /// The process was killed by the daemon due to the CPU time limit.
    CpuTimeLimitExceeded,

    /// The process was killed by the daemon due to the real (wall-clock)
    /// time limit.
    RealTimeLimitExceeded,

    /// The process was killed by the daemon due to the memory limit.
    MemoryLimitExceeded,

    /// The daemon itself hit an internal error while supervising the
    /// process.
    SandboxError { message: String },
}

impl Default for ProcessExitStatus {
    fn default() -> ProcessExitStatus {
        ProcessExitStatus::NotExited
    }
}

/// Resource usage statistics of a sandboxed process, as observed by the
/// sampling loop. Every field reports the maximum ("peak") seen across every
/// sample taken during the process's lifetime so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessResourceUsage {
    /// CPU time spent in user mode.
    pub user_cpu_time: Duration,

    /// CPU time spent in kernel mode.
    pub kernel_cpu_time: Duration,

    /// Peak virtual memory size, in bytes.
    pub virtual_mem_size: usize,

    /// Peak resident set size, in bytes.
    pub resident_set_size: usize,
}

impl ProcessResourceUsage {
    /// Get the total CPU time consumed: the sum of user and kernel time.
    pub fn cpu_time(&self) -> Duration {
        self.user_cpu_time + self.kernel_cpu_time
    }

    /// Update the usage statistics stored in this instance with a fresher
    /// sample, keeping the peak value in every field.
    fn update(&mut self, other: &ProcessResourceUsage) {
        if other.user_cpu_time > self.user_cpu_time {
            self.user_cpu_time = other.user_cpu_time;
        }
        if other.kernel_cpu_time > self.kernel_cpu_time {
            self.kernel_cpu_time = other.kernel_cpu_time;
        }
        if other.virtual_mem_size > self.virtual_mem_size {
            self.virtual_mem_size = other.virtual_mem_size;
        }
        if other.resident_set_size > self.resident_set_size {
            self.resident_set_size = other.resident_set_size;
        }
    }
}

/// A handle to a sandboxed child process.
pub struct Process {
    /// Platform identifier of the child process (pid on POSIX, process id on
    /// Windows).
    pid: Pid,

    /// Daemon related context, shared with the daemon thread.
    context: Arc<ProcessDaemonContext>,

    /// Join handle of the daemon thread. `None` once the `Process` instance
    /// has been waited for.
    daemon: Option<DaemonThreadJoinHandle>,
}

impl Process {
    /// Create a new `Process` instance attaching to the just-spawned child.
    fn attach(spawned: platform::SpawnedProcess, limits: ProcessResourceLimits) -> Process {
        let pid = spawned.pid();
        let context = Arc::new(ProcessDaemonContext::new(spawned, limits));
        let daemon_handle = daemon::start(context.clone());

        Process {
            pid,
            context,
            daemon: Some(daemon_handle),
        }
    }

    /// Get the platform process identifier of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Get the exit status of the process. Returns `ProcessExitStatus::NotExited`
    /// until the process has actually terminated (or been killed).
    pub fn exit_status(&self) -> ProcessExitStatus {
        self.context.exit_status()
    }

    /// Get the resource usage statistics of the process observed so far.
    pub fn rusage(&self) -> ProcessResourceUsage {
        self.context.rusage()
    }

    /// Request that the child process be terminated immediately. Used by
    /// cooperative cancellation (see `judge::cancellation`).
    pub fn kill(&self) {
        self.context.request_kill();
    }

    /// Wait for the child process to exit (or be killed), joining the
    /// daemon thread. Panics if called more than once on the same
    /// `Process` instance.
    pub fn wait_for_exit(&mut self) -> Result<()> {
        self.daemon
            .take()
            .expect("wait_for_exit called twice on the same Process")
            .join()
            .map_err(|_| Error::from(ErrorKind::DaemonJoinFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySize;

    #[test]
    fn test_memory_size_to_bytes() {
        assert_eq!(2, MemorySize::Bytes(2).bytes());
        assert_eq!(2 * 1024, MemorySize::KiloBytes(2).bytes());
        assert_eq!(2 * 1024 * 1024, MemorySize::MegaBytes(2).bytes());
        assert_eq!(2 * 1024 * 1024 * 1024, MemorySize::GigaBytes(2).bytes());
    }

    #[test]
    fn test_memory_size_ordering() {
        assert!(MemorySize::KiloBytes(1) > MemorySize::Bytes(1000));
        assert_eq!(MemorySize::KiloBytes(1), MemorySize::Bytes(1024));
    }
}
