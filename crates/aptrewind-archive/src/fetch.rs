use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use aptrewind_core::ArtifactRef;
use sha2::{Digest, Sha256};

/// Fetches one artifact into the cache directory. A cache hit is only reused
/// when its sha256 sidecar still matches the file on disk, so truncated or
/// tampered downloads get replaced instead of installed. Fresh downloads are
/// checked against the size the archive reported before they become visible
/// under the final name.
pub(crate) fn fetch_verified<F>(
    artifact: &ArtifactRef,
    cache_dir: &Path,
    download: F,
) -> Result<PathBuf>
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let target = cache_dir.join(&artifact.filename);
    let sidecar = sidecar_path(&target);

    if let Some(path) = verified_cache_hit(&target, &sidecar)? {
        return Ok(path);
    }

    let bytes = download(&artifact.url)?;
    if let Some(expected) = artifact.size {
        if bytes.len() as u64 != expected {
            bail!(
                "downloaded {} has {} bytes, archive reported {expected}",
                artifact.filename,
                bytes.len()
            );
        }
    }

    let digest = sha256_hex(&bytes);
    let staging = cache_dir.join(format!("{}.part", artifact.filename));
    fs::write(&staging, &bytes)
        .with_context(|| format!("failed to write download: {}", staging.display()))?;
    fs::rename(&staging, &target)
        .with_context(|| format!("failed to finalize download: {}", target.display()))?;
    fs::write(&sidecar, format!("{digest}\n"))
        .with_context(|| format!("failed to write checksum sidecar: {}", sidecar.display()))?;

    Ok(target)
}

fn verified_cache_hit(target: &Path, sidecar: &Path) -> Result<Option<PathBuf>> {
    if !target.is_file() || !sidecar.is_file() {
        return Ok(None);
    }

    let recorded = fs::read_to_string(sidecar)
        .with_context(|| format!("failed to read checksum sidecar: {}", sidecar.display()))?;
    let bytes = fs::read(target)
        .with_context(|| format!("failed to read cached artifact: {}", target.display()))?;

    if recorded.trim() == sha256_hex(&bytes) {
        Ok(Some(target.to_path_buf()))
    } else {
        Ok(None)
    }
}

fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".sha256");
    target.with_file_name(name)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
