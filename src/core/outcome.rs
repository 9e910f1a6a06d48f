use serde::{Deserialize, Serialize};
use std::fmt;

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Exited with code 0 within both limits
    Success,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Non-zero exit code or terminated by a signal
    RuntimeError,
    /// Terminated on request (user interrupt), not because of a limit
    Killed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::TimeLimitExceeded => "time_limit_exceeded",
            OutcomeKind::MemoryLimitExceeded => "memory_limit_exceeded",
            OutcomeKind::RuntimeError => "runtime_error",
            OutcomeKind::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// Result of one supervised run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub kind: OutcomeKind,
    /// Exit code, if the process exited on its own
    pub exit_code: Option<i32>,
    /// Terminating signal (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Wall clock time in milliseconds
    pub time_used_ms: u64,
    /// Peak resident memory in KB (0 if unknown)
    pub memory_used_kb: u64,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} ms, {} KB",
            self.kind, self.time_used_ms, self.memory_used_kb
        )?;
        if let Some(code) = self.exit_code {
            write!(f, ", exit code {}", code)?;
        }
        if let Some(signal) = self.signal {
            write!(f, ", signal {}", signal)?;
        }
        write!(f, ")")
    }
}
