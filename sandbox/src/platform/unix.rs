use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{IntoRawFd, RawFd};

use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, close, execve, fork, pipe2, read, write, ForkResult};

use crate::rlimits::{self, Resource};
use crate::{Error, ErrorKind, ProcessBuilder, ProcessResourceUsage, Result};

use super::SampleOutcome;

/// Process identifier, as returned by `fork`.
pub type Pid = libc::pid_t;

/// Raw, unclassified exit information as reported by `waitpid`.
#[derive(Clone, Copy, Debug)]
pub enum RawExit {
    Exited(i32),
    Signaled(Signal),
}

/// A handle to a running (or recently-exited) child process.
pub struct SpawnedProcess {
    pid: Pid,
}

impl SpawnedProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

fn to_nix_err(e: nix::Error) -> Error {
    Error::from(ErrorKind::ChildStartupFailed(e.to_string()))
}

/// Apply working directory changes to the calling (child) process.
fn apply_working_directory(spec: &ProcessBuilder) -> Result<()> {
    if let Some(dir) = &spec.working_dir {
        chdir(dir.as_path()).map_err(to_nix_err)?;
    }
    Ok(())
}

/// Apply resource limits using the native `rlimit` mechanism, if requested.
fn apply_native_rlimits(spec: &ProcessBuilder) -> Result<()> {
    if spec.use_native_rlimit {
        if let Some(limit) = spec.limits.cpu_time_limit {
            rlimits::setrlimit_hard(Resource::CPUTime, limit.as_secs())?;
        }
        if let Some(limit) = spec.limits.memory_limit {
            rlimits::setrlimit_hard(Resource::AddressSpace, limit.bytes() as u64)?;
        }
        // The real (wall-clock) time limit has no native rlimit equivalent
        // and is always enforced by the daemon thread.
    }
    Ok(())
}

/// Apply the redirections specified in `spec` to the calling (child) process.
fn apply_redirections(spec: &mut ProcessBuilder) -> Result<()> {
    if let Some(file) = spec.redirections.stdin.take() {
        nix::unistd::dup2(file.into_raw_fd(), libc::STDIN_FILENO).map_err(to_nix_err)?;
    }
    if let Some(file) = spec.redirections.stdout.take() {
        nix::unistd::dup2(file.into_raw_fd(), libc::STDOUT_FILENO).map_err(to_nix_err)?;
    }
    if let Some(file) = spec.redirections.stderr.take() {
        nix::unistd::dup2(file.into_raw_fd(), libc::STDERR_FILENO).map_err(to_nix_err)?;
    }
    Ok(())
}

/// Runs in the child after `fork`. Sets up the child's environment and then
/// `execve`s into the target program. Never returns on success.
fn start_child(mut spec: ProcessBuilder) -> Result<()> {
    let native_file = CString::new(Vec::from(spec.file().as_os_str().as_bytes()))
        .map_err(|_| Error::from(ErrorKind::ChildStartupFailed("file path contains NUL".into())))?;
    let native_argv = spec
        .args()
        .iter()
        .map(|arg| CString::new(arg.clone()).unwrap())
        .collect::<Vec<CString>>();
    let native_envs = spec
        .envs()
        .iter()
        .map(|(name, value)| CString::new(format!("{}={}", name, value)).unwrap())
        .collect::<Vec<CString>>();

    apply_redirections(&mut spec)?;
    apply_working_directory(&spec)?;
    apply_native_rlimits(&spec)?;

    execve(&native_file, native_argv.as_ref(), native_envs.as_ref()).map_err(to_nix_err)?;

    unreachable!("execve does not return on success")
}

/// Block until either the child's copy of `read_fd` closes on its own (a
/// successful `execve` closes every close-on-exec descriptor, including this
/// pipe's write end) or the child writes a byte to report a startup failure.
/// Returns `true` if the child reported failure.
fn wait_for_exec_signal(read_fd: RawFd) -> Result<bool> {
    let mut buf = [0u8; 1];
    loop {
        match read(read_fd, &mut buf) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => continue,
            Err(e) => return Err(to_nix_err(e)),
        }
    }
}

pub fn spawn(spec: ProcessBuilder) -> Result<SpawnedProcess> {
    // A close-on-exec self-pipe: the child writes a byte here if it fails
    // to start (a failed `chdir`/redirection/rlimit application, or a
    // failed `execve`), and otherwise never touches it again, letting a
    // successful `execve` close its end implicitly. This is the only way
    // the parent can distinguish "exec failed" from "exec succeeded, the
    // program then ran and exited" across a bare `fork`/`execve`.
    let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC).map_err(to_nix_err)?;

    match fork().map_err(to_nix_err)? {
        ForkResult::Parent { child } => {
            let _ = close(write_fd);
            let failed = wait_for_exec_signal(read_fd);
            let _ = close(read_fd);

            match failed {
                Ok(true) => {
                    // The child already reported failure; reap it so it
                    // doesn't linger as a zombie.
                    let _ = waitpid(child, None);
                    Err(Error::from(ErrorKind::ChildStartupFailed(
                        "child process failed to start".to_string(),
                    )))
                }
                Ok(false) => Ok(SpawnedProcess {
                    pid: child.as_raw(),
                }),
                Err(e) => {
                    let _ = waitpid(child, None);
                    Err(e)
                }
            }
        }
        ForkResult::Child => {
            let _ = close(read_fd);
            match start_child(spec) {
                Ok(()) => unreachable!(),
                Err(e) => {
                    eprintln!("failed to start child process: {}", e);
                    let _ = write(write_fd, &[1u8]);
                    // Skip atexit/Drop handlers inherited from the parent's
                    // address space; this process never ran the contestant.
                    unsafe { libc::_exit(127) };
                }
            }
        }
    }
}

fn read_usage(pid: Pid) -> Result<ProcessResourceUsage> {
    let stat = procfs::process::Process::new(pid)
        .and_then(|p| p.stat())
        .map_err(|e| Error::from(ErrorKind::ChildStartupFailed(e.to_string())))?;

    Ok(ProcessResourceUsage {
        user_cpu_time: crate::misc::duration_from_clocks(stat.utime as libc::clock_t),
        kernel_cpu_time: crate::misc::duration_from_clocks(stat.stime as libc::clock_t),
        virtual_mem_size: stat.vsize as usize,
        resident_set_size: (stat.rss as usize) * procfs_page_size(),
    })
}

fn procfs_page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as usize
    }
}

pub fn sample(handle: &SpawnedProcess) -> Result<SampleOutcome> {
    let pid = nix::unistd::Pid::from_raw(handle.pid);
    let status = waitpid(pid, Some(WaitPidFlag::WNOHANG)).map_err(to_nix_err)?;

    match status {
        WaitStatus::Exited(_, code) => Ok(SampleOutcome::Exited(RawExit::Exited(code))),
        WaitStatus::Signaled(_, sig, _) => Ok(SampleOutcome::Exited(RawExit::Signaled(sig))),
        _ => Ok(SampleOutcome::Alive(read_usage(handle.pid)?)),
    }
}

pub fn terminate(handle: &SpawnedProcess) -> Result<()> {
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(handle.pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::Error::Sys(nix::errno::Errno::ESRCH)) => Ok(()),
        Err(e) => Err(to_nix_err(e)),
    }
}

pub fn reap(handle: &SpawnedProcess) -> Result<RawExit> {
    let pid = nix::unistd::Pid::from_raw(handle.pid);
    loop {
        match waitpid(pid, None).map_err(to_nix_err)? {
            WaitStatus::Exited(_, code) => return Ok(RawExit::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => return Ok(RawExit::Signaled(sig)),
            _ => continue,
        }
    }
}
