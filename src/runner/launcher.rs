//! Process launcher
//!
//! Spawns a program with its standard streams redirected to files.

use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::sys::{self, ProcessHandle};
use super::RunnerError;

/// Redirection files for the three standard streams.
/// Unset streams are connected to the null device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IoSpec {
    /// Opened read-only as stdin
    pub input_file: Option<PathBuf>,
    /// Created or truncated for stdout
    pub output_file: Option<PathBuf>,
    /// Created or truncated for stderr
    pub error_file: Option<PathBuf>,
}

impl IoSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, path: impl AsRef<Path>) -> Self {
        self.input_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
        self.output_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_error(mut self, path: impl AsRef<Path>) -> Self {
        self.error_file = Some(path.as_ref().to_path_buf());
        self
    }
}

/// Start `program` with `args`, detached from our own standard streams
pub fn launch(program: &Path, args: &[&OsStr], io: &IoSpec) -> Result<ProcessHandle, RunnerError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(open_input(io.input_file.as_deref())?)
        .stdout(open_output(io.output_file.as_deref())?)
        .stderr(open_output(io.error_file.as_deref())?);
    sys::prepare_command(&mut command);

    let child = command.spawn().map_err(|source| RunnerError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    debug!("Spawned {:?} {:?} as pid {}", program, args, child.id());

    Ok(ProcessHandle::from_child(child))
}

fn open_input(path: Option<&Path>) -> Result<Stdio, RunnerError> {
    match path {
        None => Ok(Stdio::null()),
        Some(path) => File::open(path)
            .map(Stdio::from)
            .map_err(|source| RunnerError::Redirect {
                path: path.to_path_buf(),
                source,
            }),
    }
}

fn open_output(path: Option<&Path>) -> Result<Stdio, RunnerError> {
    match path {
        None => Ok(Stdio::null()),
        Some(path) => File::create(path)
            .map(Stdio::from)
            .map_err(|source| RunnerError::Redirect {
                path: path.to_path_buf(),
                source,
            }),
    }
}
