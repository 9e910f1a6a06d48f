//! Stress test configuration
//!
//! Loaded from a TOML file (`--config`, or `STRESS_CONFIG`, or `stress.toml`
//! in the working directory). Every field has a default, so the file is
//! optional. Command line flags override file values through `Overrides`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::judger::StageLimits;
use crate::runner::Limits;

pub const DEFAULT_CONFIG_PATH: &str = "stress.toml";
pub const CONFIG_ENV: &str = "STRESS_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressConfig {
    /// Generator name (`<name>.cpp` / `<name>`)
    pub generator: String,
    /// Reference solution name
    pub standard: String,
    /// Checker name; gets `<input> <output> <answer>`
    pub checker: String,
    /// Prefix of the per-test files (`<file>.in`, `.out`, `.ans`, `.log`)
    pub file: String,
    /// Directory holding the sources, binaries and test files
    pub work_dir: PathBuf,
    /// Number of generated tests
    pub tests: u64,
    /// Judgers running side by side
    pub jobs: usize,
    pub limits: LimitsConfig,
    pub compile: CompileConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            generator: "gen".into(),
            standard: "std".into(),
            checker: "chk".into(),
            file: "data".into(),
            work_dir: PathBuf::from("."),
            tests: 100,
            jobs: 1,
            limits: LimitsConfig::default(),
            compile: CompileConfig::default(),
        }
    }
}

/// Limits in the units people write them in: milliseconds and megabytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Executor and standard
    pub time_ms: u64,
    pub memory_mb: u64,
    pub generator_time_ms: u64,
    pub generator_memory_mb: u64,
    pub checker_time_ms: u64,
    pub checker_memory_mb: u64,
    pub memory_poll_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            memory_mb: 256,
            generator_time_ms: 10_000,
            generator_memory_mb: 512,
            checker_time_ms: 10_000,
            checker_memory_mb: 512,
            memory_poll_interval_ms: 20,
        }
    }
}

impl LimitsConfig {
    pub fn stage_limits(&self) -> Result<StageLimits> {
        let limits = |kind: &str, time_ms: u64, memory_mb: u64| {
            Limits::new(time_ms, memory_mb.saturating_mul(1024))
                .with_context(|| format!("Invalid {} limits", kind))
        };
        Ok(StageLimits {
            generator: limits("generator", self.generator_time_ms, self.generator_memory_mb)?,
            solution: limits("solution", self.time_ms, self.memory_mb)?,
            checker: limits("checker", self.checker_time_ms, self.checker_memory_mb)?,
            memory_poll_interval: self.memory_poll_interval(),
        })
    }

    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
    pub compiler: String,
    /// Extra compiler flags, split on whitespace
    pub options: String,
    /// Compiler diagnostics end up here, relative to `work_dir`
    pub log: PathBuf,
    /// Compile stamps, relative to `work_dir`
    pub cache_dir: PathBuf,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".into(),
            options: "-O2 -std=c++17".into(),
            log: PathBuf::from("compile.log"),
            cache_dir: PathBuf::from(".stress-judge"),
        }
    }
}

impl CompileConfig {
    pub fn option_list(&self) -> Vec<String> {
        self.options.split_whitespace().map(|s| s.to_string()).collect()
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub generator: Option<String>,
    pub standard: Option<String>,
    pub checker: Option<String>,
    pub tests: Option<u64>,
    pub time_ms: Option<u64>,
    pub memory_mb: Option<u64>,
    pub jobs: Option<usize>,
}

impl StressConfig {
    /// Load the configuration. An explicitly named file must exist; the
    /// default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
            },
        };

        if !explicit && !path.exists() {
            debug!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(generator) = &overrides.generator {
            self.generator = generator.clone();
        }
        if let Some(standard) = &overrides.standard {
            self.standard = standard.clone();
        }
        if let Some(checker) = &overrides.checker {
            self.checker = checker.clone();
        }
        if let Some(tests) = overrides.tests {
            self.tests = tests;
        }
        if let Some(time_ms) = overrides.time_ms {
            self.limits.time_ms = time_ms;
        }
        if let Some(memory_mb) = overrides.memory_mb {
            self.limits.memory_mb = memory_mb;
        }
        if let Some(jobs) = overrides.jobs {
            self.jobs = jobs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }
        if self.file.is_empty() {
            anyhow::bail!("file prefix must not be empty");
        }
        self.limits.stage_limits()?;
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join(&self.compile.log)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join(&self.compile.cache_dir)
    }

    /// Test file prefix of judger `index`. The first judger uses the plain
    /// prefix so a single-job run writes `data.in` and friends.
    pub fn file_prefix(&self, index: usize) -> String {
        if index == 0 {
            self.file.clone()
        } else {
            format!("{}_{}", self.file, index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = StressConfig::from_toml("").unwrap();
        assert_eq!(config, StressConfig::default());
        assert_eq!(config.limits.time_ms, 1000);
        assert_eq!(config.compile.compiler, "g++");
    }

    #[test]
    fn test_parse_partial_config() {
        let config = StressConfig::from_toml(
            r#"
generator = "rand"
tests = 500

[limits]
time_ms = 2000
memory_mb = 64

[compile]
options = "-O2 -DLOCAL"
"#,
        )
        .unwrap();

        assert_eq!(config.generator, "rand");
        assert_eq!(config.standard, "std");
        assert_eq!(config.tests, 500);
        assert_eq!(config.limits.time_ms, 2000);
        assert_eq!(config.limits.checker_time_ms, 10_000);
        assert_eq!(config.compile.option_list(), vec!["-O2", "-DLOCAL"]);

        let limits = config.limits.stage_limits().unwrap();
        assert_eq!(limits.solution.time_limit_ms, 2000);
        assert_eq!(limits.solution.memory_limit_kb, 64 * 1024);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(StressConfig::from_toml("tset = 5").is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(StressConfig::from_toml("jobs = 0").is_err());
        assert!(StressConfig::from_toml("[limits]\ntime_ms = 0").is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = StressConfig::default();
        config.apply(&Overrides {
            standard: Some("brute".into()),
            time_ms: Some(3000),
            jobs: Some(4),
            ..Default::default()
        });

        assert_eq!(config.standard, "brute");
        assert_eq!(config.generator, "gen");
        assert_eq!(config.limits.time_ms, 3000);
        assert_eq!(config.jobs, 4);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "file = \"case\"\n").unwrap();

        let config = StressConfig::load(Some(&path)).unwrap();
        assert_eq!(config.file, "case");
        assert!(StressConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_file_prefix_per_judger() {
        let config = StressConfig::default();
        assert_eq!(config.file_prefix(0), "data");
        assert_eq!(config.file_prefix(2), "data_2");
    }
}
