use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aptrewind_archive::DEFAULT_ARCHIVE_URL;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/aptrewind.toml";
const DEFAULT_LOG_ROOT: &str = "/var/log";
const DEFAULT_CACHE_DIR: &str = "/var/cache/aptrewind";
const DEFAULT_PARALLEL: usize = 4;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// On-disk configuration; every key optional so a partial file works.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub log_root: Option<PathBuf>,
    pub archive_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub parallel: Option<usize>,
    pub http_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse aptrewind config")
    }
}

/// Loads configuration. An explicitly named file must exist and parse; an
/// absent default path just means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ConfigFile> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if !default.is_file() {
                return Ok(ConfigFile::default());
            }
            default
        }
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    ConfigFile::parse(&content).with_context(|| format!("in config file: {}", path.display()))
}

/// Fully resolved settings: CLI flags override the config file, defaults
/// fill whatever is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_root: PathBuf,
    pub archive_url: String,
    pub cache_dir: PathBuf,
    pub parallel: usize,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub log_root: Option<PathBuf>,
    pub archive_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub parallel: Option<usize>,
}

impl Settings {
    pub fn resolve(file: ConfigFile, overrides: SettingsOverrides) -> Self {
        Self {
            log_root: overrides
                .log_root
                .or(file.log_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_ROOT)),
            archive_url: overrides
                .archive_url
                .or(file.archive_url)
                .unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string()),
            cache_dir: overrides
                .cache_dir
                .or(file.cache_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            parallel: overrides
                .parallel
                .or(file.parallel)
                .unwrap_or(DEFAULT_PARALLEL)
                .max(1),
            http_timeout_secs: file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}
