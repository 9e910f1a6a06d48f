//! Linux process accounting
//!
//! The child gets its own process group so kills reach everything it forked.
//! Exit is observed with `waitid(WNOWAIT)`, which leaves a zombie behind: the
//! pid cannot be recycled until `reap` collects status and rusage.

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use tracing::{debug, warn};
use wait4::{ResUse, Wait4};

use super::ExitUsage;

/// Put the child in its own process group so the whole tree can be killed
pub fn prepare_command(command: &mut Command) {
    command.process_group(0);
}

/// Owned handle to a spawned child.
///
/// Dropping a handle that was never reaped kills and reaps the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    child: Mutex<Child>,
    reaped: AtomicBool,
}

impl ProcessHandle {
    pub fn from_child(child: Child) -> Self {
        Self {
            pid: Pid::from_raw(child.id() as i32),
            child: Mutex::new(child),
            reaped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the process exits. The process is left as a zombie, so its
    /// pid stays reserved until `reap` is called.
    pub fn wait_exit(&self) -> io::Result<()> {
        loop {
            match waitid(Id::Pid(self.pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send SIGKILL to the process group, falling back to the process itself.
    /// Failures are logged and otherwise ignored.
    pub fn kill(&self) {
        if self.reaped.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = killpg(self.pid, Signal::SIGKILL) {
            debug!("killpg({}) failed: {}, killing the process only", self.pid, e);
            if let Err(e) = kill(self.pid, Signal::SIGKILL) {
                debug!("kill({}) failed: {}", self.pid, e);
            }
        }
    }

    /// Collect exit status and rusage, releasing the pid
    pub fn reap(&self) -> io::Result<ExitUsage> {
        let ResUse { status, rusage } = {
            let mut child = self.child();
            loop {
                match child.wait4() {
                    Ok(usage) => break usage,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        };
        self.reaped.store(true, Ordering::SeqCst);

        Ok(ExitUsage {
            exit_code: status.code(),
            signal: status.signal(),
            peak_memory_kb: own_peak_kb(rusage.maxrss / 1024),
        })
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.reaped.load(Ordering::SeqCst) {
            return;
        }
        self.kill();
        if let Err(e) = self.reap() {
            warn!("Failed to reap process {}: {}", self.pid, e);
        }
    }
}

/// A child's `ru_maxrss` starts from the high-water mark of the address space
/// it was spawned from, i.e. ours. Only a value above our own peak is known to
/// be the child's; anything else is dropped in favour of the sampled peak.
fn own_peak_kb(maxrss_kb: u64) -> u64 {
    match getrusage(UsageWho::RUSAGE_SELF) {
        Ok(usage) if maxrss_kb > usage.max_rss().max(0) as u64 => maxrss_kb,
        Ok(_) => 0,
        Err(e) => {
            debug!("getrusage failed: {}", e);
            0
        }
    }
}
