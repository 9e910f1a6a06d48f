//! Cleanup of everything a stress run leaves behind
//!
//! Removes the per-test files of every judger, the compile log, binaries
//! built from a `.cpp` source (found through the compile stamps) and the
//! stamp directory itself. Prebuilt executables without a source are kept.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::compiler::{binary_path, source_path};
use crate::config::StressConfig;

const TEST_FILE_EXTENSIONS: [&str; 4] = ["in", "out", "ans", "log"];

/// Delete generated files and return the ones that existed
pub async fn clean(config: &StressConfig) -> Result<Vec<PathBuf>> {
    let mut targets = Vec::new();
    for index in 0..config.jobs {
        let prefix = config.file_prefix(index);
        for ext in TEST_FILE_EXTENSIONS {
            targets.push(config.work_dir.join(format!("{}.{}", prefix, ext)));
        }
    }
    targets.push(config.log_path());
    targets.extend(compiled_binaries(&config.work_dir, &config.cache_dir()).await?);

    let mut removed = Vec::new();
    for target in targets {
        if remove_file(&target).await? {
            debug!("Removed {}", target.display());
            removed.push(target);
        }
    }

    let cache_dir = config.cache_dir();
    match tokio::fs::remove_dir_all(&cache_dir).await {
        Ok(()) => removed.push(cache_dir),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", cache_dir.display()))
        }
    }

    info!("Removed {} files", removed.len());
    Ok(removed)
}

/// Binaries that have a compile stamp and a source next to them
async fn compiled_binaries(work_dir: &Path, cache_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(cache_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", cache_dir.display()))
        }
    };

    let mut binaries = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sha256") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if source_path(work_dir, name).exists() {
            binaries.push(binary_path(work_dir, name));
        }
    }
    binaries.sort();
    Ok(binaries)
}

async fn remove_file(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
