//! Outcome classification
//!
//! Maps what the watchdog observed about a finished process to a single
//! `OutcomeKind`. Checks run in a fixed order: explicit kills first, then the
//! time limit, the memory limit, and finally the exit status.

use crate::core::{OutcomeKind, ProcessOutcome};

use super::sys::ExitUsage;
use super::Limits;

/// Why the supervision core killed a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// `terminate()` was called (user interrupt)
    Cancelled,
    /// The watchdog deadline fired
    TimeLimit,
    /// Sampled peak memory went over the limit
    MemoryLimit,
}

/// Everything known about a process once it has been reaped
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub killed: Option<KillReason>,
    /// `None` if the exit status could not be collected
    pub usage: Option<ExitUsage>,
    pub elapsed_ms: u64,
    /// Highest memory sample taken while the process ran
    pub sampled_peak_kb: u64,
}

impl Observation {
    pub fn peak_memory_kb(&self) -> u64 {
        let reaped = self.usage.map(|u| u.peak_memory_kb).unwrap_or(0);
        reaped.max(self.sampled_peak_kb)
    }
}

pub fn classify(obs: &Observation, limits: &Limits) -> OutcomeKind {
    match obs.killed {
        Some(KillReason::Cancelled) => return OutcomeKind::Killed,
        Some(KillReason::TimeLimit) => return OutcomeKind::TimeLimitExceeded,
        Some(KillReason::MemoryLimit) => return OutcomeKind::MemoryLimitExceeded,
        None => {}
    }

    if obs.elapsed_ms > limits.time_limit_ms {
        OutcomeKind::TimeLimitExceeded
    } else if obs.peak_memory_kb() > limits.memory_limit_kb {
        OutcomeKind::MemoryLimitExceeded
    } else if !obs.usage.is_some_and(|u| u.is_clean_exit()) {
        OutcomeKind::RuntimeError
    } else {
        OutcomeKind::Success
    }
}

/// Build the full outcome, including the reported time
pub fn to_outcome(obs: &Observation, limits: &Limits) -> ProcessOutcome {
    let kind = classify(obs, limits);
    let time_used_ms = match obs.killed {
        // The process ran at least as long as the limit
        Some(KillReason::TimeLimit) => limits.time_limit_ms,
        _ => obs.elapsed_ms,
    };

    ProcessOutcome {
        kind,
        exit_code: obs.usage.and_then(|u| u.exit_code),
        signal: obs.usage.and_then(|u| u.signal),
        time_used_ms,
        memory_used_kb: obs.peak_memory_kb(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
        }
    }

    fn exited(code: i32, peak_kb: u64) -> Option<ExitUsage> {
        Some(ExitUsage {
            exit_code: Some(code),
            signal: None,
            peak_memory_kb: peak_kb,
        })
    }

    fn observe(usage: Option<ExitUsage>, elapsed_ms: u64) -> Observation {
        Observation {
            killed: None,
            usage,
            elapsed_ms,
            sampled_peak_kb: 0,
        }
    }

    #[test]
    fn test_clean_exit_is_success() {
        let obs = observe(exited(0, 2048), 15);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::Success);
    }

    #[test]
    fn test_time_checked_before_memory_and_exit_code() {
        let obs = observe(exited(3, 1 << 20), 1500);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::TimeLimitExceeded);
    }

    #[test]
    fn test_memory_checked_before_exit_code() {
        let obs = observe(exited(3, 1 << 20), 10);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::MemoryLimitExceeded);
    }

    #[test]
    fn test_sampled_peak_counts_towards_memory() {
        let mut obs = observe(exited(0, 1024), 10);
        obs.sampled_peak_kb = 70_000;
        assert_eq!(classify(&obs, &limits()), OutcomeKind::MemoryLimitExceeded);
        assert_eq!(to_outcome(&obs, &limits()).memory_used_kb, 70_000);
    }

    #[test]
    fn test_nonzero_exit_and_signal_are_runtime_errors() {
        let obs = observe(exited(42, 0), 10);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::RuntimeError);

        let signaled = observe(
            Some(ExitUsage {
                exit_code: None,
                signal: Some(11),
                peak_memory_kb: 0,
            }),
            10,
        );
        assert_eq!(classify(&signaled, &limits()), OutcomeKind::RuntimeError);
    }

    #[test]
    fn test_unknown_status_is_runtime_error() {
        let obs = observe(None, 10);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::RuntimeError);
    }

    #[test]
    fn test_cancellation_wins_over_limits() {
        let mut obs = observe(exited(0, 1 << 20), 5000);
        obs.killed = Some(KillReason::Cancelled);
        assert_eq!(classify(&obs, &limits()), OutcomeKind::Killed);
    }

    #[test]
    fn test_time_limit_kill_reports_limit_as_time() {
        let mut obs = observe(None, 1003);
        obs.killed = Some(KillReason::TimeLimit);
        let outcome = to_outcome(&obs, &limits());
        assert_eq!(outcome.kind, OutcomeKind::TimeLimitExceeded);
        assert_eq!(outcome.time_used_ms, 1000);
        assert_eq!(outcome.exit_code, None);
    }
}
