use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use aptrewind_core::{ArtifactRef, PackageKey};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::LookupResult;

/// Client for the snapshot.debian.org machine-readable API. One lookup is
/// `GET {base}/mr/binary/{package}/{version}/binfiles?fileinfo=1`; the file
/// hashes in the response name retrievable URLs under `{base}/file/{hash}`.
#[derive(Debug)]
pub struct SnapshotArchive {
    base_url: String,
    http: Client,
}

impl SnapshotArchive {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aptrewind/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build archive http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn lookup(&self, key: &PackageKey, version: &str) -> Result<LookupResult> {
        let url = format!(
            "{}/mr/binary/{}/{}/binfiles?fileinfo=1",
            self.base_url, key.name, version
        );

        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("archive lookup request failed: {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(LookupResult::UnknownVersion);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("archive lookup rejected: {url}"))?;

        let body = response
            .bytes()
            .with_context(|| format!("archive lookup interrupted: {url}"))?;
        let payload: BinFilesResponse = serde_json::from_slice(&body)
            .with_context(|| format!("archive lookup returned unusable JSON: {url}"))?;

        Ok(LookupResult::Found(candidates_from_response(
            &payload,
            &self.base_url,
            key,
        )))
    }

    pub(crate) fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("artifact download request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("artifact download rejected: {url}"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("artifact download interrupted: {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BinFilesResponse {
    #[serde(default)]
    result: Vec<HashEntry>,
    #[serde(default)]
    fileinfo: BTreeMap<String, Vec<FileInfoEntry>>,
}

#[derive(Debug, Deserialize)]
struct HashEntry {
    hash: String,
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct FileInfoEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Extracts candidate artifacts for one `(package, version, architecture)`
/// from a binfiles response. Exact-architecture builds come before `all`
/// builds; file names that do not look like `{package}_*_{arch}.deb` are
/// someone else's files (the fileinfo map can carry source tarballs too) and
/// are skipped. The filename's version segment is not matched because the
/// archive strips epochs there.
pub(crate) fn candidates_from_response(
    payload: &BinFilesResponse,
    base_url: &str,
    key: &PackageKey,
) -> Vec<ArtifactRef> {
    let mut candidates = Vec::new();

    for wanted_arch in [key.architecture.as_str(), "all"] {
        for entry in &payload.result {
            if entry.architecture != wanted_arch {
                continue;
            }
            let Some(files) = payload.fileinfo.get(&entry.hash) else {
                continue;
            };
            for file in files {
                if !deb_name_matches(&file.name, &key.name, wanted_arch) {
                    continue;
                }
                candidates.push(ArtifactRef {
                    url: format!("{base_url}/file/{}", entry.hash),
                    filename: file.name.clone(),
                    size: file.size,
                });
            }
        }
        // An exact-arch build satisfies the request outright; only fall
        // through to arch-independent builds when nothing matched.
        if !candidates.is_empty() {
            break;
        }
    }

    candidates
}

fn deb_name_matches(name: &str, package: &str, architecture: &str) -> bool {
    let Some(rest) = name.strip_prefix(package) else {
        return false;
    };
    rest.starts_with('_') && rest.ends_with(&format!("_{architecture}.deb"))
}
