use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aptrewind_core::{PackageEvent, ParseWarning};
use flate2::read::GzDecoder;

mod dpkg;
mod history;

pub use dpkg::parse_dpkg_log;
pub use history::parse_apt_history;

/// Which grammar a log source speaks. Selected by the caller when the source
/// is declared, never inferred from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGrammar {
    DpkgLog,
    AptHistory,
}

impl LogGrammar {
    /// Tie-break rank for same-timestamp events across sources. dpkg.log is
    /// the transaction-level ground truth, so its events sort first when a
    /// manager-level log reports the same second.
    fn rank(self) -> u8 {
        match self {
            Self::DpkgLog => 0,
            Self::AptHistory => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSource {
    pub grammar: LogGrammar,
    pub path: PathBuf,
}

impl LogSource {
    pub fn new(grammar: LogGrammar, path: impl Into<PathBuf>) -> Self {
        Self {
            grammar,
            path: path.into(),
        }
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Scans a log root for every supported source: `dpkg.log`, its rotations
/// (`dpkg.log.N`, `dpkg.log.N.gz`), and `apt/history.log` plus rotations.
/// A missing apt directory is fine; an empty result is the caller's fatal
/// condition, not ours.
pub fn discover_sources(log_root: &Path) -> Result<Vec<LogSource>> {
    let mut sources = Vec::new();

    let mut dpkg_names = matching_file_names(log_root, "dpkg.log")?;
    dpkg_names.sort();
    for name in dpkg_names {
        sources.push(LogSource::new(LogGrammar::DpkgLog, log_root.join(name)));
    }

    let apt_root = log_root.join("apt");
    if apt_root.is_dir() {
        let mut apt_names = matching_file_names(&apt_root, "history.log")?;
        apt_names.sort();
        for name in apt_names {
            sources.push(LogSource::new(LogGrammar::AptHistory, apt_root.join(name)));
        }
    }

    Ok(sources)
}

fn matching_file_names(dir: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read log directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Reads one source to text, transparently decoding `.gz` rotations.
pub fn read_source_text(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read log file: {}", path.display()))?;

    if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        let mut text = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .with_context(|| format!("failed to decompress log file: {}", path.display()))?;
        return Ok(text);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses every source and merges the results into one globally ascending
/// event sequence. Sources may cover overlapping periods, so this is a merge
/// by sort key `(timestamp, grammar rank, source index, line)`, not a
/// concatenation. Malformed lines surface as warnings; they never abort the
/// run.
pub fn read_events(sources: &[LogSource]) -> Result<(Vec<PackageEvent>, Vec<ParseWarning>)> {
    let mut ordered: Vec<(PackageEvent, u8, usize, usize)> = Vec::new();
    let mut warnings = Vec::new();

    for (source_index, source) in sources.iter().enumerate() {
        let text = read_source_text(&source.path)?;
        let name = source.display_name();
        let (events, mut source_warnings) = match source.grammar {
            LogGrammar::DpkgLog => parse_dpkg_log(&text, &name),
            LogGrammar::AptHistory => parse_apt_history(&text, &name),
        };
        warnings.append(&mut source_warnings);
        for (line, event) in events {
            ordered.push((event, source.grammar.rank(), source_index, line));
        }
    }

    ordered.sort_by(|left, right| {
        (left.0.timestamp, left.1, left.2, left.3).cmp(&(
            right.0.timestamp,
            right.1,
            right.2,
            right.3,
        ))
    });

    let events = ordered.into_iter().map(|(event, ..)| event).collect();
    Ok((events, warnings))
}
