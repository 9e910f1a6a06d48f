//! Runner module - Supervised execution of one external program
//!
//! A `Runner` wraps one program (generator, solution, checker, ...) and can
//! run it any number of times, one invocation at a time:
//! - `start`: launch with redirected streams and spawn the watchdog
//! - `wait`: wait for the classified `ProcessOutcome`
//! - `terminate`: kill the current invocation from any thread
//!
//! The runner module does NOT:
//! - Compare outputs or determine verdicts
//! - Compile programs
//! - Sandbox anything beyond wall time and memory

pub mod classify;
pub mod launcher;
pub mod sys;
pub mod watchdog;

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::ProcessOutcome;

pub use classify::KillReason;
pub use launcher::IoSpec;
use watchdog::ProcessControl;

/// Default interval between peak memory samples
pub const DEFAULT_MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors from the supervision core. Limit violations and crashes are not
/// errors; they are reported through `ProcessOutcome::kind`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid limits: time limit {time_limit_ms} ms, memory limit {memory_limit_kb} KB")]
    InvalidLimits {
        time_limit_ms: u64,
        memory_limit_kb: u64,
    },
    #[error("failed to open {path:?} for redirection")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{name} is already running")]
    AlreadyRunning { name: String },
    #[error("{name} has not been started")]
    NotStarted { name: String },
    #[error("watchdog of {name} stopped without producing an outcome")]
    WatchdogLost { name: String },
}

/// Resource limits for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall clock limit in milliseconds
    pub time_limit_ms: u64,
    /// Peak resident memory limit in KB
    pub memory_limit_kb: u64,
}

impl Limits {
    pub fn new(time_limit_ms: u64, memory_limit_kb: u64) -> Result<Self, RunnerError> {
        if time_limit_ms == 0 || memory_limit_kb == 0 {
            return Err(RunnerError::InvalidLimits {
                time_limit_ms,
                memory_limit_kb,
            });
        }
        Ok(Self {
            time_limit_ms,
            memory_limit_kb,
        })
    }
}

/// Immutable description of a supervised program
#[derive(Debug, Clone)]
pub struct RunnerSpec {
    /// Human readable label used in logs
    pub name: String,
    pub program: PathBuf,
    /// Leading arguments, passed before the ones given to `start`
    pub args: Vec<OsString>,
    pub limits: Limits,
    pub memory_poll_interval: Duration,
}

impl RunnerSpec {
    pub fn new(name: impl Into<String>, program: impl AsRef<Path>, limits: Limits) -> Self {
        Self {
            name: name.into(),
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            limits,
            memory_poll_interval: DEFAULT_MEMORY_POLL_INTERVAL,
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

    pub fn with_memory_poll_interval(mut self, interval: Duration) -> Self {
        self.memory_poll_interval = interval;
        self
    }
}

/// One start → wait cycle
struct Invocation {
    control: Arc<ProcessControl>,
    done: watch::Receiver<Option<ProcessOutcome>>,
    terminated: bool,
}

/// Supervisor for repeated runs of one program
pub struct Runner {
    spec: RunnerSpec,
    io: Mutex<IoSpec>,
    current: Mutex<Option<Invocation>>,
    last: Mutex<Option<ProcessOutcome>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Runner {
    pub fn new(spec: RunnerSpec) -> Self {
        Self {
            spec,
            io: Mutex::new(IoSpec::new()),
            current: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &RunnerSpec {
        &self.spec
    }

    /// Redirect stdin of the next invocation from `path`
    pub fn set_input_file(&self, path: impl AsRef<Path>) {
        lock(&self.io).input_file = Some(path.as_ref().to_path_buf());
    }

    /// Redirect stdout of the next invocation to `path`
    pub fn set_output_file(&self, path: impl AsRef<Path>) {
        lock(&self.io).output_file = Some(path.as_ref().to_path_buf());
    }

    /// Redirect stderr of the next invocation to `path`
    pub fn set_error_file(&self, path: impl AsRef<Path>) {
        lock(&self.io).error_file = Some(path.as_ref().to_path_buf());
    }

    /// Launch the program and start supervising it. Returns immediately.
    ///
    /// Fails with `AlreadyRunning` if the previous invocation was neither
    /// waited for nor terminated. Must be called from within a tokio runtime.
    pub fn start(&self, args: &[&OsStr]) -> Result<(), RunnerError> {
        let mut current = lock(&self.current);
        if let Some(previous) = current.as_ref() {
            if !previous.terminated {
                return Err(RunnerError::AlreadyRunning {
                    name: self.spec.name.clone(),
                });
            }
            // The watchdog of a terminated invocation reaps it on its own
            debug!("{}: discarding terminated invocation", self.spec.name);
        }

        let io = lock(&self.io).clone();
        let started = Instant::now();
        let argv: Vec<&OsStr> = self
            .spec
            .args
            .iter()
            .map(OsString::as_os_str)
            .chain(args.iter().copied())
            .collect();
        let handle = launcher::launch(&self.spec.program, &argv, &io)?;
        let control = Arc::new(ProcessControl::new(handle));

        let (tx, rx) = watch::channel(None);
        let supervise = watchdog::supervise(
            self.spec.name.clone(),
            Arc::clone(&control),
            self.spec.limits,
            self.spec.memory_poll_interval,
            started,
        );
        tokio::spawn(async move {
            let outcome = supervise.await;
            let _ = tx.send(Some(outcome));
        });

        *current = Some(Invocation {
            control,
            done: rx,
            terminated: false,
        });
        Ok(())
    }

    /// Wait for the current invocation to finish and return its outcome.
    ///
    /// Without a new `start`, returns the stored outcome of the previous one.
    /// Dropping the returned future does not affect the invocation.
    pub async fn wait(&self) -> Result<ProcessOutcome, RunnerError> {
        let (control, mut done) = {
            let current = lock(&self.current);
            match current.as_ref() {
                Some(invocation) => (Arc::clone(&invocation.control), invocation.done.clone()),
                None => {
                    return self.last_outcome().ok_or_else(|| RunnerError::NotStarted {
                        name: self.spec.name.clone(),
                    })
                }
            }
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        let outcome = outcome.ok_or_else(|| RunnerError::WatchdogLost {
            name: self.spec.name.clone(),
        })?;

        {
            let mut current = lock(&self.current);
            if current
                .as_ref()
                .is_some_and(|invocation| Arc::ptr_eq(&invocation.control, &control))
            {
                *current = None;
            }
        }
        *lock(&self.last) = Some(outcome.clone());
        Ok(outcome)
    }

    /// Kill the current invocation, if any. Idempotent and callable from any
    /// thread; the invocation then reports `Killed` unless it had already
    /// finished on its own.
    pub fn terminate(&self) {
        let mut current = lock(&self.current);
        if let Some(invocation) = current.as_mut() {
            invocation.terminated = true;
            if invocation.control.kill(KillReason::Cancelled) {
                info!("{} terminated", self.spec.name);
            }
        }
    }

    /// Outcome of the most recent completed `wait`; `None` before the first one
    pub fn last_outcome(&self) -> Option<ProcessOutcome> {
        lock(&self.last).clone()
    }

    /// True between `start` and the outcome becoming available
    pub fn running(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|invocation| invocation.done.borrow().is_none())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("spec", &self.spec)
            .field("running", &self.running())
            .finish()
    }
}
