pub mod outcome;
pub mod verdict;

pub use outcome::{OutcomeKind, ProcessOutcome};
pub use verdict::{JudgeResult, Verdict};
