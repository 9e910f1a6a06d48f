//! Judger module - One generate → solve → check round
//!
//! A `Judger` owns four long-lived runners and a file prefix inside a work
//! directory:
//! - generator writes `<id>.in`
//! - executor (solution under test) reads `<id>.in`, writes `<id>.out`
//! - standard (reference solution) reads `<id>.in`, writes `<id>.ans`
//! - checker gets `<id>.in <id>.out <id>.ans`, its stderr goes to `<id>.log`
//!
//! The first stage that does not succeed decides the verdict.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cancel::Terminate;
use crate::checker::checker_verdict;
use crate::core::{JudgeResult, OutcomeKind, ProcessOutcome, Verdict};
use crate::runner::{Limits, Runner, RunnerSpec};

/// An executable plus the arguments it always gets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub path: PathBuf,
    pub args: Vec<OsString>,
}

impl Program {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// The four programs of a stress test
#[derive(Debug, Clone)]
pub struct Programs {
    pub generator: Program,
    pub executor: Program,
    pub standard: Program,
    pub checker: Program,
}

/// Limits per stage. Executor and standard share `solution`.
#[derive(Debug, Clone, Copy)]
pub struct StageLimits {
    pub generator: Limits,
    pub solution: Limits,
    pub checker: Limits,
    pub memory_poll_interval: Duration,
}

pub struct Judger {
    id: String,
    input_path: PathBuf,
    output_path: PathBuf,
    answer_path: PathBuf,
    log_path: PathBuf,
    generator: Runner,
    executor: Runner,
    standard: Runner,
    checker: Runner,
    /// Set by `terminate`, cleared by `resume`
    stopped: AtomicBool,
}

fn runner(
    judger_id: &str,
    role: &str,
    program: &Program,
    limits: Limits,
    memory_poll_interval: Duration,
) -> Runner {
    let spec = RunnerSpec::new(format!("{}/{}", judger_id, role), &program.path, limits)
        .with_args(program.args.iter().cloned())
        .with_memory_poll_interval(memory_poll_interval);
    Runner::new(spec)
}

/// Stand-in outcome for a stage that never ran
fn not_run() -> ProcessOutcome {
    ProcessOutcome {
        kind: OutcomeKind::Killed,
        exit_code: None,
        signal: None,
        time_used_ms: 0,
        memory_used_kb: 0,
    }
}

impl Judger {
    /// Create a judger whose files are `<dir>/<id>.{in,out,ans,log}`
    pub fn new(id: impl Into<String>, dir: &Path, programs: &Programs, limits: &StageLimits) -> Self {
        let id = id.into();
        let with_ext = |ext: &str| dir.join(format!("{}.{}", id, ext));
        let poll = limits.memory_poll_interval;

        let judger = Self {
            input_path: with_ext("in"),
            output_path: with_ext("out"),
            answer_path: with_ext("ans"),
            log_path: with_ext("log"),
            generator: runner(&id, "generator", &programs.generator, limits.generator, poll),
            executor: runner(&id, "executor", &programs.executor, limits.solution, poll),
            standard: runner(&id, "standard", &programs.standard, limits.solution, poll),
            checker: runner(&id, "checker", &programs.checker, limits.checker, poll),
            stopped: AtomicBool::new(false),
            id,
        };

        judger.generator.set_output_file(&judger.input_path);
        judger.executor.set_input_file(&judger.input_path);
        judger.executor.set_output_file(&judger.output_path);
        judger.standard.set_input_file(&judger.input_path);
        judger.standard.set_output_file(&judger.answer_path);
        judger.checker.set_error_file(&judger.log_path);
        judger
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn answer_path(&self) -> &Path {
        &self.answer_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// All files this judger writes
    pub fn files(&self) -> [&Path; 4] {
        [
            &self.input_path,
            &self.output_path,
            &self.answer_path,
            &self.log_path,
        ]
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Request a stop and kill whatever stage is running. Until `resume` is
    /// called every `judge` returns `Terminated`.
    pub fn terminate(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.generator.terminate();
        self.executor.terminate();
        self.standard.terminate();
        self.checker.terminate();
    }

    /// Clear a previous stop request
    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Run one round. Errors are reserved for programs that cannot be
    /// started at all; every process behaviour is reported in the result.
    pub async fn judge(&self) -> Result<JudgeResult> {
        let result = self.run_pipeline().await?;
        debug!("{}: {} ({})", self.id, result.kind, result.info);
        Ok(result)
    }

    async fn run_pipeline(&self) -> Result<JudgeResult> {
        if self.is_stopped() {
            return Ok(JudgeResult::new(Verdict::Terminated, not_run()));
        }

        let generated = self.run(&self.generator, &[]).await?;
        if let Some(result) = self.failed_stage(generated, Verdict::GeneratorError) {
            return Ok(result);
        }

        let (executed, standard) = self.run_solutions().await?;
        if let Some(result) = self.failed_stage(executed.clone(), Verdict::ExecutorError) {
            return Ok(result);
        }
        if let Some(result) = self.failed_stage(standard, Verdict::StandardError) {
            return Ok(result);
        }

        let args = [
            self.input_path.as_os_str(),
            self.output_path.as_os_str(),
            self.answer_path.as_os_str(),
        ];
        let checked = self.run(&self.checker, &args).await?;
        if checked.kind == OutcomeKind::Killed || self.is_stopped() {
            return Ok(JudgeResult::new(Verdict::Terminated, checked));
        }

        let result = match checked.kind {
            OutcomeKind::Success => JudgeResult::new(Verdict::Accepted, executed),
            OutcomeKind::RuntimeError => {
                let verdict = match checked.exit_code.map(checker_verdict) {
                    Some(Verdict::CheckerError) | None => Verdict::CheckerError,
                    Some(_) => Verdict::WrongAnswer,
                };
                JudgeResult::new(verdict, checked)
            }
            _ => JudgeResult::new(Verdict::CheckerError, checked),
        };
        Ok(result)
    }

    /// Run executor and standard side by side. If the executor fails the
    /// standard is terminated, but still awaited.
    async fn run_solutions(&self) -> Result<(ProcessOutcome, ProcessOutcome)> {
        self.executor
            .start(&[])
            .with_context(|| format!("Failed to start {}", self.executor.name()))?;
        if let Err(e) = self.standard.start(&[]) {
            self.executor.terminate();
            let _ = self.executor.wait().await;
            return Err(e).with_context(|| format!("Failed to start {}", self.standard.name()));
        }
        if self.is_stopped() {
            self.executor.terminate();
            self.standard.terminate();
        }

        let executed = self.executor.wait().await?;
        if !executed.is_success() {
            self.standard.terminate();
        }
        let standard = self.standard.wait().await?;
        Ok((executed, standard))
    }

    async fn run(&self, runner: &Runner, args: &[&OsStr]) -> Result<ProcessOutcome> {
        runner
            .start(args)
            .with_context(|| format!("Failed to start {}", runner.name()))?;
        // A stop that landed before `start` found nothing to kill
        if self.is_stopped() {
            runner.terminate();
        }
        let outcome = runner.wait().await?;
        if !outcome.is_success() {
            info!("{} finished: {}", runner.name(), outcome);
        }
        Ok(outcome)
    }

    fn failed_stage(&self, outcome: ProcessOutcome, verdict: Verdict) -> Option<JudgeResult> {
        if outcome.kind == OutcomeKind::Killed || self.is_stopped() {
            Some(JudgeResult::new(Verdict::Terminated, outcome))
        } else if !outcome.is_success() {
            Some(JudgeResult::new(verdict, outcome))
        } else {
            None
        }
    }
}

impl Terminate for Judger {
    fn terminate(&self) {
        Judger::terminate(self);
    }
}

impl std::fmt::Debug for Judger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Judger")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sh(script: &str) -> Program {
        // `$1 $2 $3` are the extra arguments
        Program::new("/bin/sh").with_args(["-c", script, "sh"])
    }

    fn limits() -> StageLimits {
        let limits = Limits::new(3000, 256 * 1024).unwrap();
        StageLimits {
            generator: limits,
            solution: limits,
            checker: limits,
            memory_poll_interval: Duration::from_millis(10),
        }
    }

    /// Checker that compares output and answer byte by byte
    fn cmp_checker() -> Program {
        sh("cmp -s \"$2\" \"$3\" || { echo \"output differs\" >&2; exit 1; }")
    }

    fn programs(generator: Program, executor: Program, standard: Program) -> Programs {
        Programs {
            generator,
            executor,
            standard,
            checker: cmp_checker(),
        }
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "data",
            dir.path(),
            &programs(sh("true"), sh("true"), sh("true")),
            &limits(),
        );
        assert_eq!(judger.input_path(), dir.path().join("data.in"));
        assert_eq!(judger.output_path(), dir.path().join("data.out"));
        assert_eq!(judger.answer_path(), dir.path().join("data.ans"));
        assert_eq!(judger.log_path(), dir.path().join("data.log"));
    }

    #[tokio::test]
    async fn test_matching_outputs_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(
                sh("echo 3 4"),
                sh("read a b; echo $((a + b))"),
                sh("read a b; echo $((b + a))"),
            ),
            &limits(),
        );

        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::Accepted);
        assert_eq!(result.info.exit_code, Some(0));
        assert_eq!(std::fs::read_to_string(judger.output_path()).unwrap(), "7\n");
    }

    #[tokio::test]
    async fn test_checker_rejection_is_wrong_answer() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(
                sh("echo 3 4"),
                sh("read a b; echo $((a * b))"),
                sh("read a b; echo $((a + b))"),
            ),
            &limits(),
        );

        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::WrongAnswer);
        assert_eq!(result.info.exit_code, Some(1));
        assert_eq!(
            std::fs::read_to_string(judger.log_path()).unwrap(),
            "output differs\n"
        );
    }

    #[tokio::test]
    async fn test_checker_fail_is_checker_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut programs = programs(sh("echo 1"), sh("cat"), sh("cat"));
        programs.checker = sh("exit 3");
        let judger = Judger::new("t", dir.path(), &programs, &limits());

        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::CheckerError);
        assert_eq!(result.info.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_failing_stages_map_to_their_verdicts() {
        let dir = tempfile::tempdir().unwrap();

        let judger = Judger::new(
            "gen",
            dir.path(),
            &programs(sh("exit 1"), sh("cat"), sh("cat")),
            &limits(),
        );
        assert_eq!(judger.judge().await.unwrap().kind, Verdict::GeneratorError);

        let judger = Judger::new(
            "exe",
            dir.path(),
            &programs(sh("echo 1"), sh("exit 2"), sh("cat")),
            &limits(),
        );
        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::ExecutorError);
        assert_eq!(result.info.exit_code, Some(2));

        let judger = Judger::new(
            "std",
            dir.path(),
            &programs(sh("echo 1"), sh("cat"), sh("exit 4")),
            &limits(),
        );
        assert_eq!(judger.judge().await.unwrap().kind, Verdict::StandardError);
    }

    #[tokio::test]
    async fn test_executor_failure_stops_standard() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(sh("echo 1"), sh("exit 1"), sh("sleep 5")),
            &limits(),
        );

        let started = std::time::Instant::now();
        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::ExecutorError);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_executor_timeout_is_executor_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut limits = limits();
        limits.solution = Limits::new(300, 256 * 1024).unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(sh("echo 1"), sh("sleep 5"), sh("cat")),
            &limits,
        );

        let result = judger.judge().await.unwrap();
        assert_eq!(result.kind, Verdict::ExecutorError);
        assert_eq!(result.info.kind, OutcomeKind::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn test_terminate_reports_terminated_until_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Arc::new(Judger::new(
            "t",
            dir.path(),
            &programs(sh("echo 1"), sh("sleep 5; cat"), sh("cat")),
            &limits(),
        ));

        let running = Arc::clone(&judger);
        let task = tokio::spawn(async move { running.judge().await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        judger.terminate();

        let result = task.await.unwrap().unwrap();
        assert_eq!(result.kind, Verdict::Terminated);
        assert_eq!(judger.judge().await.unwrap().kind, Verdict::Terminated);

        judger.resume();
        assert!(!judger.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_between_stages_kills_the_next_stage() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(sh("sleep 5"), sh("sleep 5"), sh("sleep 5")),
            &limits(),
        );
        // As if `terminate` ran after the previous stage was checked
        judger.stopped.store(true, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let generated = judger.run(&judger.generator, &[]).await.unwrap();
        assert_eq!(generated.kind, OutcomeKind::Killed);

        let (executed, standard) = judger.run_solutions().await.unwrap();
        assert_eq!(executed.kind, OutcomeKind::Killed);
        assert_eq!(standard.kind, OutcomeKind::Killed);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_generator_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let judger = Judger::new(
            "t",
            dir.path(),
            &programs(Program::new(dir.path().join("gen")), sh("cat"), sh("cat")),
            &limits(),
        );
        assert!(judger.judge().await.is_err());
    }
}
