use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use aptrewind_core::{ArtifactRef, PackageKey};

mod api;
mod fetch;
mod resolve;

pub use api::SnapshotArchive;
pub use resolve::resolve_plan;

pub const DEFAULT_ARCHIVE_URL: &str = "http://snapshot.debian.org";

/// What a version lookup learned from the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The archive has no record of this package at this version.
    UnknownVersion,
    /// Candidate artifacts, best first. May be empty when the version is
    /// known but every file has been pruned upstream.
    Found(Vec<ArtifactRef>),
}

/// The remote archive capability. Enum dispatch keeps the two backends in
/// one place: the real snapshot.debian.org client and an in-memory fixture
/// for tests, which never touches the network.
#[derive(Debug)]
pub enum ArchiveClient {
    Snapshot(SnapshotArchive),
    Fixture(FixtureArchive),
}

impl ArchiveClient {
    pub fn lookup(&self, key: &PackageKey, version: &str) -> Result<LookupResult> {
        match self {
            Self::Snapshot(archive) => archive.lookup(key, version),
            Self::Fixture(archive) => archive.lookup(key, version),
        }
    }

    /// Downloads one artifact into the cache, reusing a verified cache hit.
    /// Falls back through the remaining candidate locations when the primary
    /// is gone.
    pub fn fetch(&self, artifact: &ArtifactRef, cache_dir: &Path) -> Result<PathBuf> {
        match self {
            Self::Snapshot(archive) => {
                fetch::fetch_verified(artifact, cache_dir, |url| archive.download(url))
            }
            Self::Fixture(archive) => {
                fetch::fetch_verified(artifact, cache_dir, |url| archive.download(url))
            }
        }
    }

    pub fn fetch_with_fallbacks(
        &self,
        artifact: &ArtifactRef,
        fallbacks: &[ArtifactRef],
        cache_dir: &Path,
    ) -> Result<PathBuf> {
        let mut last_error = None;
        for candidate in std::iter::once(artifact).chain(fallbacks) {
            match self.fetch(candidate, cache_dir) {
                Ok(path) => return Ok(path),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no candidate artifacts to fetch")))
    }
}

/// In-memory archive used by tests and dry runs against canned data. Keyed
/// by `(name, architecture, version)`; payload bytes are keyed by URL so
/// fallback candidates can point at distinct content.
#[derive(Debug, Default)]
pub struct FixtureArchive {
    versions: BTreeMap<(String, String, String), Vec<ArtifactRef>>,
    payloads: BTreeMap<String, Vec<u8>>,
}

impl FixtureArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_version(&mut self, key: &PackageKey, version: &str, candidates: Vec<ArtifactRef>) {
        self.versions.insert(
            (
                key.name.clone(),
                key.architecture.clone(),
                version.to_string(),
            ),
            candidates,
        );
    }

    pub fn insert_payload(&mut self, url: &str, bytes: Vec<u8>) {
        self.payloads.insert(url.to_string(), bytes);
    }

    fn lookup(&self, key: &PackageKey, version: &str) -> Result<LookupResult> {
        let lookup_key = (
            key.name.clone(),
            key.architecture.clone(),
            version.to_string(),
        );
        match self.versions.get(&lookup_key) {
            Some(candidates) => Ok(LookupResult::Found(candidates.clone())),
            None => Ok(LookupResult::UnknownVersion),
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.payloads
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("fixture has no payload for {url}"))
    }
}
