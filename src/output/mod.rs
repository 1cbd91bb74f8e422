use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::encoding::Artifact;

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes `artifact` into `dir` under its suggested filename.
///
/// An existing file is never overwritten; a numeric suffix is added instead.
pub fn save_artifact(artifact: &Artifact, dir: &Path) -> Result<PathBuf> {
    validate_output_dir(dir)?;
    let filename = validate_filename(artifact.filename())?;

    fs::create_dir_all(dir)?;
    let path = free_path(dir, filename)?;
    fs::write(&path, artifact.bytes())?;

    tracing::info!(path = %path.display(), bytes = artifact.size(), "artifact saved");
    Ok(path)
}

fn validate_output_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(anyhow!("Output directory path is empty"));
    }

    let dir_str = dir.to_string_lossy();
    if dir_str.contains("..") {
        return Err(anyhow!("Output directory contains path traversal"));
    }

    #[cfg(windows)]
    {
        if dir_str.starts_with("\\\\") {
            return Err(anyhow!("Network paths are not allowed"));
        }
        let dangerous_prefixes = ["C:\\Windows", "C:\\Program Files", "C:\\System"];
        let lower = dir_str.to_lowercase();
        if dangerous_prefixes
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
        {
            return Err(anyhow!("Cannot save to system directories"));
        }
    }

    #[cfg(unix)]
    {
        let dangerous_prefixes = ["/bin", "/sbin", "/usr/bin", "/usr/sbin", "/etc", "/boot"];
        if dangerous_prefixes.iter().any(|prefix| dir.starts_with(prefix)) {
            return Err(anyhow!("Cannot save to system directories"));
        }
    }

    Ok(())
}

fn validate_filename(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(anyhow!("Invalid artifact filename: {:?}", name));
    }
    if name.starts_with('.') {
        return Err(anyhow!("Cannot create hidden files"));
    }
    Ok(name)
}

fn free_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (filename, None),
    };
    for n in 1..=MAX_NAME_ATTEMPTS {
        let name = match ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(anyhow!("No free filename for {} in {}", filename, dir.display()))
}
