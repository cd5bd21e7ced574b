//! Freezing and thawing a live encoder without terminating it.

use shared_child::SharedChild;

use crate::JobError;

/// Suspend/resume every thread of a spawned encoder.
///
/// Implementations go through the `SharedChild` handle so that a child which
/// has already been reaped is never confused with a process that reused its pid.
pub trait ProcessControl: Send + Sync {
    fn suspend(&self, child: &SharedChild) -> Result<(), JobError>;
    fn resume(&self, child: &SharedChild) -> Result<(), JobError>;
}

/// The implementation for the target this crate was built for.
#[cfg(unix)]
pub fn platform_control() -> Box<dyn ProcessControl> {
    Box::new(unix::SignalControl)
}

#[cfg(windows)]
pub fn platform_control() -> Box<dyn ProcessControl> {
    Box::new(win::ThreadControl)
}

#[cfg(not(any(unix, windows)))]
pub fn platform_control() -> Box<dyn ProcessControl> {
    Box::new(Unsupported)
}

/// Pause/resume gate for targets without a suspend primitive.
pub struct Unsupported;

impl ProcessControl for Unsupported {
    fn suspend(&self, _child: &SharedChild) -> Result<(), JobError> {
        Err(JobError::SuspendUnsupported)
    }

    fn resume(&self, _child: &SharedChild) -> Result<(), JobError> {
        Err(JobError::SuspendUnsupported)
    }
}

#[cfg(unix)]
mod unix {
    use super::ProcessControl;
    use crate::JobError;
    use shared_child::unix::SharedChildExt;
    use shared_child::SharedChild;

    /// SIGSTOP halts all threads at once; a single SIGCONT releases them however often they were stopped.
    /// Signals to a child that has already been waited on are dropped by `send_signal`.
    pub struct SignalControl;

    impl ProcessControl for SignalControl {
        fn suspend(&self, child: &SharedChild) -> Result<(), JobError> {
            child
                .send_signal(libc::SIGSTOP)
                .map_err(JobError::ProcessControl)
        }

        fn resume(&self, child: &SharedChild) -> Result<(), JobError> {
            child
                .send_signal(libc::SIGCONT)
                .map_err(JobError::ProcessControl)
        }
    }
}

#[cfg(windows)]
mod win {
    use super::ProcessControl;
    use crate::JobError;
    use shared_child::SharedChild;
    use std::io;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
    };
    use windows::Win32::System::Threading::{
        OpenThread, ResumeThread, SuspendThread, THREAD_SUSPEND_RESUME,
    };

    pub struct ThreadControl;

    impl ProcessControl for ThreadControl {
        fn suspend(&self, child: &SharedChild) -> Result<(), JobError> {
            if exited(child) {
                return Ok(());
            }
            for_each_thread(child.id(), |handle| unsafe {
                SuspendThread(handle);
            })
        }

        fn resume(&self, child: &SharedChild) -> Result<(), JobError> {
            if exited(child) {
                return Ok(());
            }
            for_each_thread(child.id(), |handle| loop {
                // Returns the previous suspend count; keep going until the thread is runnable.
                let previous = unsafe { ResumeThread(handle) };
                if previous == u32::MAX || previous <= 1 {
                    break;
                }
            })
        }
    }

    // The process handle held by SharedChild keeps the pid from being reused until it is dropped.
    fn exited(child: &SharedChild) -> bool {
        matches!(child.try_wait(), Ok(Some(_)))
    }

    fn for_each_thread(pid: u32, mut f: impl FnMut(HANDLE)) -> Result<(), JobError> {
        for tid in thread_ids(pid)? {
            // Threads that exited since the snapshot cannot be opened; skip them.
            let Ok(handle) = (unsafe { OpenThread(THREAD_SUSPEND_RESUME, false, tid) }) else {
                continue;
            };
            f(handle);
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
        Ok(())
    }

    fn thread_ids(pid: u32) -> Result<Vec<u32>, JobError> {
        let mut ids = Vec::new();
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)
                .map_err(|e| JobError::ProcessControl(io::Error::new(io::ErrorKind::Other, e)))?;
            let mut entry = THREADENTRY32 {
                dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
                ..Default::default()
            };
            if Thread32First(snapshot, &mut entry).is_ok() {
                loop {
                    if entry.th32OwnerProcessID == pid {
                        ids.push(entry.th32ThreadID);
                    }
                    if Thread32Next(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);
        }
        Ok(ids)
    }
}
