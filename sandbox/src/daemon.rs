use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::platform::{self, RawExit, SampleOutcome, SpawnedProcess};
use crate::{ProcessExitStatus, ProcessResourceLimits, ProcessResourceUsage, Result};

/// Interval between consecutive sampling passes in the daemon thread. This
/// mirrors the cadence of a busy polling loop rather than relying on OS
/// timers, so that flaky one-off scheduler delays don't immediately read as
/// a limit violation.
const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Type for the join handle of the daemon thread.
pub type DaemonThreadJoinHandle = JoinHandle<()>;

/// Context shared between the caller and the daemon thread that is
/// monitoring a single child process.
pub struct ProcessDaemonContext {
    process: SpawnedProcess,
    limits: ProcessResourceLimits,
    status: Mutex<ProcessExitStatus>,
    rusage: Mutex<ProcessResourceUsage>,
    kill_requested: Mutex<bool>,
}

impl ProcessDaemonContext {
    pub fn new(process: SpawnedProcess, limits: ProcessResourceLimits) -> ProcessDaemonContext {
        ProcessDaemonContext {
            process,
            limits,
            status: Mutex::new(ProcessExitStatus::NotExited),
            rusage: Mutex::new(ProcessResourceUsage::default()),
            kill_requested: Mutex::new(false),
        }
    }

    pub fn exit_status(&self) -> ProcessExitStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn rusage(&self) -> ProcessResourceUsage {
        *self.rusage.lock().unwrap()
    }

    pub fn request_kill(&self) {
        *self.kill_requested.lock().unwrap() = true;
    }

    fn is_kill_requested(&self) -> bool {
        *self.kill_requested.lock().unwrap()
    }
}

fn classify_limits(
    limits: &ProcessResourceLimits,
    usage: &ProcessResourceUsage,
    real_time_elapsed: Duration,
) -> Option<ProcessExitStatus> {
    if let Some(cpu_time_limit) = limits.cpu_time_limit {
        if usage.cpu_time() > cpu_time_limit {
            return Some(ProcessExitStatus::CpuTimeLimitExceeded);
        }
    }

    if let Some(real_time_limit) = limits.real_time_limit {
        if real_time_elapsed > real_time_limit {
            return Some(ProcessExitStatus::RealTimeLimitExceeded);
        }
    }

    if let Some(memory_limit) = limits.memory_limit {
        if usage.resident_set_size > memory_limit.bytes() {
            return Some(ProcessExitStatus::MemoryLimitExceeded);
        }
    }

    None
}

fn classify_raw_exit(exit: RawExit) -> ProcessExitStatus {
    match exit {
        RawExit::Exited(code) => ProcessExitStatus::Normal(code),
        #[cfg(unix)]
        RawExit::Signaled(sig) => ProcessExitStatus::KilledBySignal(sig as i32),
    }
}

/// Main entry point of the daemon thread.
///
/// This function should not return `Ok(ProcessExitStatus::SandboxError)`.
/// Instead, it should return `Err(e)` with `e` set to the corresponding
/// error, and the caller maps that to a `SandboxError` status.
fn daemon_main(context: &ProcessDaemonContext) -> Result<ProcessExitStatus> {
    let timer = SystemTime::now();

    loop {
        log::trace!("daemon sampling child process");

        if context.is_kill_requested() {
            platform::terminate(&context.process)?;
            let exit = platform::reap(&context.process)?;
            log::trace!("daemon reaped killed child with raw exit {:?}", exit);
            return Ok(classify_raw_exit(exit));
        }

        match platform::sample(&context.process)? {
            SampleOutcome::Exited(exit) => {
                log::trace!("daemon observed child exit: {:?}", exit);
                return Ok(classify_raw_exit(exit));
            }
            SampleOutcome::Alive(usage) => {
                context.rusage.lock().unwrap().update(&usage);
                let overall = context.rusage();
                log::trace!("daemon updated resource usage: {:?}", overall);

                if let Some(status) =
                    classify_limits(&context.limits, &overall, timer.elapsed().unwrap_or_default())
                {
                    log::debug!("child process exceeded a resource limit: terminating it");
                    platform::terminate(&context.process)?;
                    let _ = platform::reap(&context.process)?;
                    return Ok(status);
                }
            }
        }

        std::thread::sleep(WAIT_INTERVAL);
    }
}

/// Start the daemon thread. The daemon thread will monitor the process
/// stored in the given context. This function returns a `JoinHandle`
/// instance representing a handle to the daemon thread.
pub fn start(context: Arc<ProcessDaemonContext>) -> DaemonThreadJoinHandle {
    log::trace!("starting daemon thread");
    std::thread::spawn(move || {
        let exit_status = match daemon_main(&context) {
            Ok(exit_status) => exit_status,
            Err(e) => ProcessExitStatus::SandboxError {
                message: e.to_string(),
            },
        };
        *context.status.lock().unwrap() = exit_status;
    })
}
