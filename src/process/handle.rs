// Signal delivery to worker process groups

use std::fmt;

/// Handle to a spawned worker.
///
/// Workers lead their own process group, so signals go to the whole group
/// and reach any children the worker started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pid: u32,
}

impl WorkerHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ask the worker group to exit.
    pub fn terminate(&self) {
        self.signal(Signal::Terminate);
    }

    /// Kill the worker group outright.
    pub fn kill(&self) {
        self.signal(Signal::Kill);
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) {
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill has no memory effects; a stale group yields ESRCH.
        unsafe {
            let _ = libc::kill(-(self.pid as i32), signo);
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) {
        tracing::warn!(pid = self.pid, "Process signals are not supported on this platform");
    }

    /// Whether any process in the worker group still exists.
    #[cfg(unix)]
    pub fn is_alive(&self) -> bool {
        // SAFETY: signal 0 only checks for existence and permission.
        unsafe { libc::kill(-(self.pid as i32), 0) == 0 }
    }

    #[cfg(not(unix))]
    pub fn is_alive(&self) -> bool {
        false
    }
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.pid)
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}
