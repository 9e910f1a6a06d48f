//! Compiler module - C++ compilation of the stress test programs
//!
//! Sources are compiled side by side with the configured compiler. Results
//! are written to the compile log:
//! - `<name>.cpp is successfully compiled.` on success
//! - `Error message of <name>:` followed by the compiler output on failure
//!
//! A program is recompiled only when its source, the compiler or the flags
//! changed since the last successful build (tracked by a sha256 stamp). A
//! program without a `.cpp` file is used as a prebuilt executable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::StressConfig;

/// Where a program's executable came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Compiled,
    UpToDate,
    Prebuilt,
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub name: String,
    pub binary: PathBuf,
    pub status: BuildStatus,
}

impl BuildResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self.status, BuildStatus::Failed { .. })
    }

    fn log_entry(&self) -> String {
        match &self.status {
            BuildStatus::Compiled => format!("{}.cpp is successfully compiled.\n", self.name),
            BuildStatus::UpToDate => format!("{}.cpp is up to date.\n", self.name),
            BuildStatus::Prebuilt => format!("{} is used as a prebuilt executable.\n", self.name),
            BuildStatus::Failed { message } => {
                format!("Error message of {}:\n{}\n", self.name, message)
            }
        }
    }
}

/// Compiles the programs of one work directory
#[derive(Debug, Clone)]
pub struct Compiler {
    work_dir: PathBuf,
    compiler: String,
    options: Vec<String>,
    cache_dir: PathBuf,
    log_path: PathBuf,
}

pub fn source_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.cpp", name))
}

pub fn binary_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
}

fn stamp_path(cache_dir: &Path, name: &str) -> PathBuf {
    cache_dir.join(format!("{}.sha256", name))
}

impl Compiler {
    pub fn new(config: &StressConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            compiler: config.compile.compiler.clone(),
            options: config.compile.option_list(),
            cache_dir: config.cache_dir(),
            log_path: config.log_path(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Build every program concurrently and write the compile log.
    /// Fails if any program could not be built.
    pub async fn compile_all(&self, names: &[&str]) -> Result<Vec<PathBuf>> {
        let mut builds = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let compiler = self.clone();
            let name = name.to_string();
            builds.spawn(async move { (index, compiler.build(name).await) });
        }

        let mut results: Vec<Option<BuildResult>> = vec![None; names.len()];
        while let Some(joined) = builds.join_next().await {
            let (index, result) = joined.context("Compile task failed")?;
            results[index] = Some(result?);
        }
        let results: Vec<BuildResult> = results.into_iter().flatten().collect();

        let log: String = results.iter().map(BuildResult::log_entry).collect();
        tokio::fs::write(&self.log_path, log)
            .await
            .with_context(|| format!("Failed to write {}", self.log_path.display()))?;

        if let Some(failed) = results.iter().find(|r| !r.is_ok()) {
            anyhow::bail!(
                "Compilation error on {}.cpp. See {} for details.",
                failed.name,
                self.log_path.display()
            );
        }

        Ok(results.into_iter().map(|r| r.binary).collect())
    }

    /// Build one program. Only environment problems are errors; a rejected
    /// source is reported as `BuildStatus::Failed`.
    pub async fn build(&self, name: String) -> Result<BuildResult> {
        let source = source_path(&self.work_dir, &name);
        let binary = binary_path(&self.work_dir, &name);

        if !source.exists() {
            if binary.exists() {
                debug!("{} has no source, using {:?}", name, binary);
                return Ok(BuildResult {
                    name,
                    binary,
                    status: BuildStatus::Prebuilt,
                });
            }
            anyhow::bail!("Neither {} nor {} exists", source.display(), binary.display());
        }

        let content = tokio::fs::read(&source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let stamp = self.stamp(&content);
        let stamp_file = stamp_path(&self.cache_dir, &name);

        if binary.exists() {
            let cached = tokio::fs::read_to_string(&stamp_file)
                .await
                .unwrap_or_default();
            if cached.trim() == stamp {
                debug!("{}.cpp unchanged, using cached binary", name);
                return Ok(BuildResult {
                    name,
                    binary,
                    status: BuildStatus::UpToDate,
                });
            }
        }

        info!("Compiling {}.cpp", name);
        let output = Command::new(&self.compiler)
            .arg(&source)
            .arg("-o")
            .arg(&binary)
            .args(&self.options)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.compiler))?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!("Compilation error on {}.cpp", name);
            // A stale stamp must not mark the old binary as current
            let _ = tokio::fs::remove_file(&stamp_file).await;
            return Ok(BuildResult {
                name,
                binary,
                status: BuildStatus::Failed { message },
            });
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.cache_dir.display()))?;
        tokio::fs::write(&stamp_file, &stamp)
            .await
            .with_context(|| format!("Failed to write {}", stamp_file.display()))?;
        info!("{}.cpp has been compiled", name);
        Ok(BuildResult {
            name,
            binary,
            status: BuildStatus::Compiled,
        })
    }

    fn stamp(&self, source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.compiler.as_bytes());
        for option in &self.options {
            hasher.update([0u8]);
            hasher.update(option.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(source);
        format!("{:x}", hasher.finalize())
    }
}
