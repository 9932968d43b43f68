use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageKey {
    pub name: String,
    pub architecture: String,
}

impl PackageKey {
    pub fn new(name: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            architecture: architecture.into(),
        }
    }

    /// Parses the `pkg:arch` form dpkg uses in its logs. A bare name without
    /// an architecture qualifier is rejected rather than defaulted: every
    /// producer in scope writes the qualified form.
    pub fn parse(token: &str) -> Option<Self> {
        let (name, arch) = token.split_once(':')?;
        if name.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(name, arch))
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.architecture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Install,
    Upgrade,
    Downgrade,
    Remove,
    Purge,
    ConfigureHalf,
    ConfigureFull,
    TriggersPending,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Remove => "remove",
            Self::Purge => "purge",
            Self::ConfigureHalf => "configure-half",
            Self::ConfigureFull => "configure-full",
            Self::TriggersPending => "triggers-pending",
            Self::Unknown => "unknown",
        }
    }
}

/// One historical fact extracted from a package-manager log. Immutable once
/// parsed; the producing source keeps events in `(timestamp, source rank,
/// sequence)` order so same-second entries replay in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEvent {
    pub timestamp: NaiveDateTime,
    pub key: PackageKey,
    pub kind: EventKind,
    pub version_before: Option<String>,
    pub version_after: Option<String>,
    pub raw_status: String,
}

/// A line that matched no production of its declared grammar. Non-fatal:
/// warnings accumulate alongside the event stream and surface in the final
/// run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub source: String,
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} ({})",
            self.source, self.line_number, self.reason, self.line
        )
    }
}
