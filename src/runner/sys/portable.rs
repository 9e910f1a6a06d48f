//! Fallback accounting built on `std::process::Child` alone.
//! Exit is detected by polling, so the pid is released as soon as the exit is
//! seen. Peak memory comes from the samples only.

use std::io;
use std::process::{Child, Command, ExitStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::ExitUsage;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub fn prepare_command(_command: &mut Command) {}

#[derive(Debug)]
pub struct ProcessHandle {
    id: u32,
    child: Mutex<Child>,
    status: Mutex<Option<ExitStatus>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessHandle {
    pub fn from_child(child: Child) -> Self {
        Self {
            id: child.id(),
            child: Mutex::new(child),
            status: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn wait_exit(&self) -> io::Result<()> {
        loop {
            if lock(&self.status).is_some() {
                return Ok(());
            }
            let exited = lock(&self.child).try_wait()?;
            if let Some(status) = exited {
                *lock(&self.status) = Some(status);
                return Ok(());
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    pub fn kill(&self) {
        if lock(&self.status).is_some() {
            return;
        }
        if let Err(e) = lock(&self.child).kill() {
            debug!("kill({}) failed: {}", self.id, e);
        }
    }

    pub fn reap(&self) -> io::Result<ExitUsage> {
        let known = *lock(&self.status);
        let status = match known {
            Some(status) => status,
            None => lock(&self.child).wait()?,
        };
        *lock(&self.status) = Some(status);
        Ok(ExitUsage {
            exit_code: status.code(),
            signal: exit_signal(&status),
            peak_memory_kb: 0,
        })
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if lock(&self.status).is_some() {
            return;
        }
        self.kill();
        if let Err(e) = self.reap() {
            warn!("Failed to reap process {}: {}", self.id, e);
        }
    }
}
