//! Platform process accounting
//!
//! Every platform exposes the same `ProcessHandle` capability:
//! - `wait_exit`: block until the process exits, without releasing its pid
//! - `kill`: forcibly stop the process (and its process group where supported)
//! - `reap`: collect the exit status and peak memory, releasing the pid
//!
//! Memory is sampled while the process runs by `MemorySampler`, which works
//! the same everywhere. The watchdog and classifier only ever talk to these
//! two types.

mod sampler;

pub use sampler::MemorySampler;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::{prepare_command, ProcessHandle};

#[cfg(not(target_os = "linux"))]
mod portable;
#[cfg(not(target_os = "linux"))]
pub use portable::{prepare_command, ProcessHandle};

/// Exit status and resource usage collected when a process is reaped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitUsage {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Peak resident memory in KB known at reap time, 0 if only the samples
    /// can tell
    pub peak_memory_kb: u64,
}

impl ExitUsage {
    /// Exited on its own with code 0
    pub fn is_clean_exit(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }
}
