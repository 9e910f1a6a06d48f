//! Resource watchdog
//!
//! Runs next to a launched process and turns it into a `ProcessOutcome`:
//! - waits for exit on a blocking helper thread (the pid is not released yet)
//! - kills the process when the wall clock deadline passes
//! - samples peak memory and kills the process when it goes over the limit
//! - reaps the process and classifies the result
//!
//! `ProcessControl` is shared with the owning `Runner`. Its state mutex is the
//! only place where a process may be killed or marked as exited, so a kill and
//! a natural exit can never both win.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::core::ProcessOutcome;

use super::classify::{self, KillReason, Observation};
use super::sys::{ExitUsage, MemorySampler, ProcessHandle};
use super::Limits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    Running,
    Exited,
    Killed(KillReason),
}

/// Process handle plus the state that serialises kills against exit
#[derive(Debug)]
pub struct ProcessControl {
    handle: ProcessHandle,
    state: Mutex<ControlState>,
}

impl ProcessControl {
    pub fn new(handle: ProcessHandle) -> Self {
        Self {
            handle,
            state: Mutex::new(ControlState::Running),
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.id()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kill the process unless it has already exited or been killed.
    /// Returns true if this call is the one that killed it.
    pub fn kill(&self, reason: KillReason) -> bool {
        let mut state = self.state();
        if *state != ControlState::Running {
            return false;
        }
        self.handle.kill();
        *state = ControlState::Killed(reason);
        true
    }

    pub fn is_running(&self) -> bool {
        *self.state() == ControlState::Running
    }

    /// Record that exit was observed. Returns the kill reason if a kill got
    /// there first.
    fn mark_exited(&self) -> Option<KillReason> {
        let mut state = self.state();
        match *state {
            ControlState::Running => {
                *state = ControlState::Exited;
                None
            }
            ControlState::Killed(reason) => Some(reason),
            ControlState::Exited => None,
        }
    }
}

/// Supervise `control` until it has exited and been reaped
pub async fn supervise(
    name: String,
    control: Arc<ProcessControl>,
    limits: Limits,
    memory_poll_interval: Duration,
    started: Instant,
) -> ProcessOutcome {
    let waiter = Arc::clone(&control);
    let exit = tokio::task::spawn_blocking(move || waiter.handle.wait_exit());
    tokio::pin!(exit);

    let deadline = time::sleep_until(started + Duration::from_millis(limits.time_limit_ms));
    tokio::pin!(deadline);
    let mut deadline_armed = true;

    let mut sampler = time::interval(memory_poll_interval);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut memory = MemorySampler::new(control.pid());
    let mut sampled_peak_kb = 0u64;

    loop {
        tokio::select! {
            result = &mut exit => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("{}: waiting for pid {} failed: {}", name, control.pid(), e),
                    Err(e) => warn!("{}: exit waiter for pid {} failed: {}", name, control.pid(), e),
                }
                break;
            }
            _ = &mut deadline, if deadline_armed => {
                deadline_armed = false;
                if control.kill(KillReason::TimeLimit) {
                    debug!("{}: time limit of {} ms reached, killed pid {}", name, limits.time_limit_ms, control.pid());
                }
            }
            _ = sampler.tick() => {
                // Linux keeps the pid reserved until `reap` below
                if let Some(kb) = memory.sample_kb() {
                    sampled_peak_kb = sampled_peak_kb.max(kb);
                    if sampled_peak_kb > limits.memory_limit_kb && control.kill(KillReason::MemoryLimit) {
                        debug!("{}: memory limit of {} KB reached ({} KB), killed pid {}", name, limits.memory_limit_kb, sampled_peak_kb, control.pid());
                    }
                }
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let killed = control.mark_exited();
    let usage = reap(&name, &control).await;

    let observation = Observation {
        killed,
        usage,
        elapsed_ms,
        sampled_peak_kb,
    };
    let outcome = classify::to_outcome(&observation, &limits);
    debug!("{}: pid {} finished: {}", name, control.pid(), outcome);
    outcome
}

async fn reap(name: &str, control: &Arc<ProcessControl>) -> Option<ExitUsage> {
    let reaper = Arc::clone(control);
    match tokio::task::spawn_blocking(move || reaper.handle.reap()).await {
        Ok(Ok(usage)) => Some(usage),
        Ok(Err(e)) => {
            warn!("{}: failed to collect exit status of pid {}: {}", name, control.pid(), e);
            None
        }
        Err(e) => {
            warn!("{}: reaper for pid {} failed: {}", name, control.pid(), e);
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::OutcomeKind;
    use crate::runner::launcher::{launch, IoSpec};
    use std::ffi::OsStr;
    use std::path::Path;

    fn start(script: &str) -> (Arc<ProcessControl>, Instant) {
        let started = Instant::now();
        let handle = launch(
            Path::new("/bin/sh"),
            &[OsStr::new("-c"), OsStr::new(script)],
            &IoSpec::new(),
        )
        .unwrap();
        (Arc::new(ProcessControl::new(handle)), started)
    }

    fn limits(time_limit_ms: u64) -> Limits {
        Limits {
            time_limit_ms,
            memory_limit_kb: 256 * 1024,
        }
    }

    #[tokio::test]
    async fn test_kill_after_exit_is_noop() {
        let (control, started) = start("exit 0");
        let outcome = supervise(
            "test".into(),
            Arc::clone(&control),
            limits(5000),
            Duration::from_millis(10),
            started,
        )
        .await;

        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert!(!control.kill(KillReason::Cancelled));
        assert!(!control.is_running());
    }

    #[tokio::test]
    async fn test_cancel_kill_is_reported_as_killed() {
        let (control, started) = start("sleep 5");
        let task = tokio::spawn(supervise(
            "test".into(),
            Arc::clone(&control),
            limits(5000),
            Duration::from_millis(10),
            started,
        ));

        time::sleep(Duration::from_millis(100)).await;
        assert!(control.kill(KillReason::Cancelled));
        assert!(!control.kill(KillReason::Cancelled));

        let outcome = task.await.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Killed);
        assert!(outcome.time_used_ms < 5000);
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let (control, started) = start("sleep 5");
        let outcome = supervise(
            "test".into(),
            control,
            limits(200),
            Duration::from_millis(10),
            started,
        )
        .await;

        assert_eq!(outcome.kind, OutcomeKind::TimeLimitExceeded);
        assert_eq!(outcome.time_used_ms, 200);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
