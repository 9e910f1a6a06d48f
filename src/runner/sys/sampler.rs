//! Resident memory sampling through `sysinfo`

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples the resident memory of one process
pub struct MemorySampler {
    pid: Pid,
    system: System,
}

impl MemorySampler {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
            system: System::new(),
        }
    }

    /// Current resident memory in KB, `None` once the process is gone
    pub fn sample_kb(&mut self) -> Option<u64> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system
            .process(self.pid)
            .map(|process| process.memory() / 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_own_process() {
        let mut sampler = MemorySampler::new(std::process::id());
        let kb = sampler.sample_kb().unwrap();
        assert!(kb > 0);
    }

    #[test]
    fn test_missing_process_has_no_sample() {
        // Above the largest pid Linux hands out
        let mut sampler = MemorySampler::new(999_999_999);
        assert!(sampler.sample_kb().is_none());
    }
}
