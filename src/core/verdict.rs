use serde::{Deserialize, Serialize};
use std::fmt;

use super::outcome::ProcessOutcome;

/// Verdict of one generate → solve → check round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    GeneratorError,
    StandardError,
    ExecutorError,
    CheckerError,
    Terminated,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::GeneratorError => "generator_error",
            Verdict::StandardError => "standard_error",
            Verdict::ExecutorError => "executor_error",
            Verdict::CheckerError => "checker_error",
            Verdict::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Result of judging one generated test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub kind: Verdict,
    /// Outcome of the stage that decided the verdict
    pub info: ProcessOutcome,
}

impl JudgeResult {
    pub fn new(kind: Verdict, info: ProcessOutcome) -> Self {
        Self { kind, info }
    }

    pub fn is_accepted(&self) -> bool {
        self.kind == Verdict::Accepted
    }
}
