use std::ffi::OsStr;
use std::mem::{size_of, zeroed};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::IntoRawHandle;
use std::ptr::null_mut;

use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::errhandlingapi::SetErrorMode;
use winapi::um::handleapi::CloseHandle;
use winapi::um::processthreadsapi::{
    CreateProcessW, GetExitCodeProcess, TerminateProcess, PROCESS_INFORMATION, STARTUPINFOW,
};
use winapi::um::psapi::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
use winapi::um::winbase::{CREATE_UNICODE_ENVIRONMENT, HIGH_PRIORITY_CLASS, SEM_NOGPFAULTERRORBOX, STARTF_USESTDHANDLES};
use winapi::um::winnt::HANDLE;
use winapi::um::winbase::{INFINITE};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::WAIT_OBJECT_0;

use crate::{Error, ErrorKind, ProcessBuilder, ProcessResourceUsage, Result};

use super::SampleOutcome;

/// Windows process identifiers are `DWORD`s.
pub type Pid = DWORD;

/// Raw exit classification. Windows has no concept of "killed by signal";
/// `TerminateProcess` simply sets the exit code we pass it.
#[derive(Clone, Copy, Debug)]
pub enum RawExit {
    Exited(i32),
}

/// A handle to a running (or recently-exited) child process.
pub struct SpawnedProcess {
    pid: Pid,
    process: HANDLE,
}

// The raw HANDLE is only ever touched through the methods below, which are
// all safe to call from any thread.
unsafe impl Send for SpawnedProcess {}
unsafe impl Sync for SpawnedProcess {}

impl SpawnedProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.process);
        }
    }
}

fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn last_error(context: &str) -> Error {
    Error::from(ErrorKind::ChildStartupFailed(format!(
        "{}: {}",
        context,
        std::io::Error::last_os_error()
    )))
}

pub fn spawn(mut spec: ProcessBuilder) -> Result<SpawnedProcess> {
    // Suppress the "this program has stopped working" dialog so a crashing
    // judgee cannot block the judging pipeline waiting for a human.
    unsafe {
        SetErrorMode(SEM_NOGPFAULTERRORBOX);
    }

    let mut command_line = spec.file().to_string_lossy().into_owned();
    for arg in spec.args() {
        command_line.push(' ');
        command_line.push_str(arg);
    }
    let mut command_line_wide = to_wide(OsStr::new(&command_line));

    let mut env_block = Vec::<u16>::new();
    for (name, value) in spec.envs() {
        env_block.extend(OsStr::new(&format!("{}={}", name, value)).encode_wide());
        env_block.push(0);
    }
    env_block.push(0);

    let working_dir_wide = spec
        .working_dir
        .as_ref()
        .map(|dir| to_wide(dir.as_os_str()));

    let mut startup_info: STARTUPINFOW = unsafe { zeroed() };
    startup_info.cb = size_of::<STARTUPINFOW>() as DWORD;
    startup_info.dwFlags = STARTF_USESTDHANDLES;

    if let Some(file) = spec.redirections.stdin.take() {
        startup_info.hStdInput = file.into_raw_handle() as HANDLE;
    }
    if let Some(file) = spec.redirections.stdout.take() {
        startup_info.hStdOutput = file.into_raw_handle() as HANDLE;
    }
    if let Some(file) = spec.redirections.stderr.take() {
        startup_info.hStdError = file.into_raw_handle() as HANDLE;
    }

    let mut process_info: PROCESS_INFORMATION = unsafe { zeroed() };

    let ok = unsafe {
        CreateProcessW(
            null_mut(),
            command_line_wide.as_mut_ptr(),
            null_mut(),
            null_mut(),
            1, // inherit handles, so the redirected std handles above take effect
            HIGH_PRIORITY_CLASS | CREATE_UNICODE_ENVIRONMENT,
            env_block.as_mut_ptr() as *mut _,
            working_dir_wide
                .as_ref()
                .map(|w| w.as_ptr())
                .unwrap_or(null_mut()),
            &mut startup_info,
            &mut process_info,
        )
    };

    if ok == FALSE {
        return Err(last_error("CreateProcessW failed"));
    }

    unsafe {
        CloseHandle(process_info.hThread);
    }

    Ok(SpawnedProcess {
        pid: process_info.dwProcessId,
        process: process_info.hProcess,
    })
}

fn filetime_to_duration(high: DWORD, low: DWORD) -> std::time::Duration {
    // FILETIME ticks are 100ns units.
    let ticks = ((high as u64) << 32) | (low as u64);
    std::time::Duration::from_nanos(ticks * 100)
}

pub fn sample(handle: &SpawnedProcess) -> Result<SampleOutcome> {
    let wait = unsafe { WaitForSingleObject(handle.process, 0) };
    if wait == WAIT_OBJECT_0 {
        let mut code: DWORD = 0;
        if unsafe { GetExitCodeProcess(handle.process, &mut code) } == FALSE {
            return Err(last_error("GetExitCodeProcess failed"));
        }
        return Ok(SampleOutcome::Exited(RawExit::Exited(code as i32)));
    }

    let mut creation = unsafe { zeroed() };
    let mut exit = unsafe { zeroed() };
    let mut kernel = unsafe { zeroed() };
    let mut user = unsafe { zeroed() };
    if unsafe {
        winapi::um::processthreadsapi::GetProcessTimes(
            handle.process,
            &mut creation,
            &mut exit,
            &mut kernel,
            &mut user,
        )
    } == FALSE
    {
        return Err(last_error("GetProcessTimes failed"));
    }

    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { zeroed() };
    counters.cb = size_of::<PROCESS_MEMORY_COUNTERS>() as DWORD;
    if unsafe {
        GetProcessMemoryInfo(
            handle.process,
            &mut counters,
            size_of::<PROCESS_MEMORY_COUNTERS>() as DWORD,
        )
    } == FALSE
    {
        return Err(last_error("GetProcessMemoryInfo failed"));
    }

    Ok(SampleOutcome::Alive(ProcessResourceUsage {
        user_cpu_time: filetime_to_duration(user.dwHighDateTime, user.dwLowDateTime),
        kernel_cpu_time: filetime_to_duration(kernel.dwHighDateTime, kernel.dwLowDateTime),
        virtual_mem_size: counters.PagefileUsage as usize,
        resident_set_size: counters.PeakWorkingSetSize as usize,
    }))
}

pub fn terminate(handle: &SpawnedProcess) -> Result<()> {
    if unsafe { TerminateProcess(handle.process, 1) } == FALSE {
        // ERROR_ACCESS_DENIED is returned when the process has already
        // exited; that is not an error for our purposes.
        return Ok(());
    }
    Ok(())
}

pub fn reap(handle: &SpawnedProcess) -> Result<RawExit> {
    unsafe {
        WaitForSingleObject(handle.process, INFINITE);
    }
    let mut code: DWORD = 0;
    if unsafe { GetExitCodeProcess(handle.process, &mut code) } == FALSE {
        return Err(last_error("GetExitCodeProcess failed"));
    }
    Ok(RawExit::Exited(code as i32))
}
