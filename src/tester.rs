//! Stress loop
//!
//! Runs `tests` rounds over a pool of judgers (one round per judger at a
//! time) and stops at the first round that is not accepted.
//!
//! Interrupts are handled in three steps:
//! - every judger is terminated, so the in-flight rounds end as `Terminated`
//! - the loop waits until all of them have reported
//! - the user is asked whether to quit; otherwise testing resumes

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::{terminate_all, Interrupts};
use crate::checker::{read_log_preview, DEFAULT_LOG_PREVIEW};
use crate::config::StressConfig;
use crate::core::{JudgeResult, Verdict};
use crate::judger::{Judger, Programs};

/// Asks the user what to do after an interrupt
pub trait Prompt {
    /// True to stop testing, false to resume
    fn ask_quit(&mut self) -> impl Future<Output = Result<bool>> + Send;
}

/// Reads the answer from stdin
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    async fn ask_quit(&mut self) -> Result<bool> {
        let answer = tokio::task::spawn_blocking(|| -> Result<String> {
            eprint!("Quit testing? (y/n): ");
            io::stderr().flush()?;
            let mut answer = String::new();
            io::stdin()
                .lock()
                .read_line(&mut answer)
                .context("Failed to read answer")?;
            Ok(answer)
        })
        .await
        .context("Prompt task failed")??;
        Ok(matches!(answer.trim(), "y" | "Y"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Every round that ran was accepted
    Passed,
    Failed,
    /// The user quit after an interrupt
    Quit,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub test: u64,
    pub result: JudgeResult,
    pub input: PathBuf,
    pub log: PathBuf,
    /// Start of the checker log
    pub log_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub status: Status,
    pub total: u64,
    pub passed: u64,
    /// Rounds cut short by an interrupt
    pub terminated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl Summary {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            Status::Failed => 1,
            Status::Passed | Status::Quit => 0,
        }
    }
}

pub struct StressTest {
    tests: u64,
    judgers: Vec<Arc<Judger>>,
}

/// One finished round
struct Round {
    test: u64,
    judger: usize,
    result: JudgeResult,
}

impl StressTest {
    pub fn new(config: &StressConfig, programs: &Programs) -> Result<Self> {
        let limits = config.limits.stage_limits()?;
        let judgers = (0..config.jobs)
            .map(|index| {
                Arc::new(Judger::new(
                    config.file_prefix(index),
                    &config.work_dir,
                    programs,
                    &limits,
                ))
            })
            .collect();
        Ok(Self {
            tests: config.tests,
            judgers,
        })
    }

    pub fn judgers(&self) -> &[Arc<Judger>] {
        &self.judgers
    }

    pub async fn run<P: Prompt>(&self, interrupts: &mut Interrupts, prompt: &mut P) -> Result<Summary> {
        let mut summary = Summary {
            status: Status::Passed,
            total: self.tests,
            passed: 0,
            terminated: 0,
            failure: None,
        };

        let mut next_test = 0;
        while next_test < self.tests {
            let batch = (self.tests - next_test).min(self.judgers.len() as u64);
            let (rounds, interrupted) = self.run_batch(next_test, batch, interrupts).await?;
            next_test += batch;

            for round in rounds {
                match round.result.kind {
                    Verdict::Accepted => {
                        summary.passed += 1;
                        info!("Test #{}: accepted ({})", round.test, round.result.info);
                    }
                    Verdict::Terminated => {
                        summary.terminated += 1;
                        warn!("Test #{}: terminated", round.test);
                    }
                    _ => {
                        let failure = self.failure(&round)?;
                        report(&failure);
                        summary.status = Status::Failed;
                        summary.failure = Some(failure);
                        return Ok(summary);
                    }
                }
            }

            if interrupted {
                let quit = prompt.ask_quit().await?;
                let dropped = interrupts.drain();
                if dropped > 0 {
                    debug!("Dropped {} queued interrupts", dropped);
                }
                if quit {
                    summary.status = Status::Quit;
                    return Ok(summary);
                }
                for judger in &self.judgers {
                    judger.resume();
                }
                info!("Resuming");
            }
        }

        info!("All {} tests passed", summary.passed);
        Ok(summary)
    }

    /// Judge tests `first..first + count`, one per judger. Returns the rounds
    /// ordered by test number and whether an interrupt arrived.
    async fn run_batch(
        &self,
        first: u64,
        count: u64,
        interrupts: &mut Interrupts,
    ) -> Result<(Vec<Round>, bool)> {
        let mut rounds = JoinSet::new();
        for (index, judger) in self.judgers.iter().take(count as usize).enumerate() {
            let judger = Arc::clone(judger);
            let test = first + index as u64;
            rounds.spawn(async move { (test, index, judger.judge().await) });
        }

        let collect = async {
            let mut finished = Vec::new();
            while let Some(joined) = rounds.join_next().await {
                finished.push(joined);
            }
            finished
        };
        tokio::pin!(collect);

        let mut interrupted = false;
        let finished = loop {
            tokio::select! {
                finished = &mut collect => break finished,
                Some(_) = interrupts.recv() => {
                    if !interrupted {
                        info!("Interrupted, terminating running programs");
                    }
                    interrupted = true;
                    terminate_all(&self.judgers);
                }
            }
        };

        let mut result = Vec::with_capacity(finished.len());
        for joined in finished {
            let (test, judger, judged) = joined.context("Judging task failed")?;
            let result_of_round =
                judged.with_context(|| format!("Failed to judge test #{}", test))?;
            result.push(Round {
                test,
                judger,
                result: result_of_round,
            });
        }
        result.sort_by_key(|round| round.test);
        Ok((result, interrupted))
    }

    fn failure(&self, round: &Round) -> Result<Failure> {
        let judger = &self.judgers[round.judger];
        let log = judger.log_path().to_path_buf();
        let log_preview = match round.result.kind {
            Verdict::WrongAnswer | Verdict::CheckerError => {
                read_log_preview(&log, DEFAULT_LOG_PREVIEW)
                    .with_context(|| format!("Failed to read {}", log.display()))?
            }
            _ => String::new(),
        };
        Ok(Failure {
            test: round.test,
            result: round.result.clone(),
            input: judger.input_path().to_path_buf(),
            log,
            log_preview,
        })
    }
}

fn report(failure: &Failure) {
    error!(
        "Test #{}: {} ({})",
        failure.test, failure.result.kind, failure.result.info
    );
    info!("Input kept in {}", failure.input.display());
    if !failure.log_preview.is_empty() {
        error!(
            "Failed on test #{} ({} bytes only):\n{}",
            failure.test, DEFAULT_LOG_PREVIEW, failure.log_preview
        );
        info!("See {} for details", failure.log.display());
    }
}
