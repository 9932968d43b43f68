use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::PackageKey;
use crate::snapshot::PackageSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    InstallVersion,
    RemoveCompletely,
    NoOp,
}

/// One step of a rollback plan. An `InstallVersion` action always carries a
/// non-empty `target_version` equal to the version in the target snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackAction {
    pub key: PackageKey,
    pub kind: ActionKind,
    pub target_version: Option<String>,
    pub current_version: Option<String>,
}

impl fmt::Display for RollbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActionKind::InstallVersion => write!(
                f,
                "install {} {}",
                self.key,
                self.target_version.as_deref().unwrap_or("?")
            ),
            ActionKind::RemoveCompletely => write!(f, "remove {}", self.key),
            ActionKind::NoOp => write!(f, "keep {}", self.key),
        }
    }
}

/// Compares the current snapshot against the target-time snapshot and emits
/// the actions that move the system back. NoOp entries are omitted. At most
/// one action is emitted per package key, in key order, so output is
/// deterministic and never proposes conflicting work for one package.
///
/// A `present == false` entry counts as absent no matter what version text it
/// still carries: a removed package only becomes diff-equal to an installed
/// one through a later install at that version.
pub fn diff_snapshots(current: &PackageSnapshot, target: &PackageSnapshot) -> Vec<RollbackAction> {
    let keys: BTreeSet<&PackageKey> = current
        .packages
        .keys()
        .chain(target.packages.keys())
        .collect();

    let mut actions = Vec::new();
    for key in keys {
        let current_version = current.installed_version(key);
        let target_version = target.installed_version(key);

        match (current_version, target_version) {
            (_, Some(wanted)) if current_version != Some(wanted) => {
                actions.push(RollbackAction {
                    key: key.clone(),
                    kind: ActionKind::InstallVersion,
                    target_version: Some(wanted.to_string()),
                    current_version: current_version.map(str::to_string),
                });
            }
            (Some(installed), None) => {
                actions.push(RollbackAction {
                    key: key.clone(),
                    kind: ActionKind::RemoveCompletely,
                    target_version: None,
                    current_version: Some(installed.to_string()),
                });
            }
            _ => {}
        }
    }

    actions
}

/// Why a version could not be turned into a retrievable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionReason {
    /// The archive has never seen this version of the package.
    VersionNeverExisted,
    /// The version is known but every candidate artifact is gone upstream.
    ArtifactsUnavailable,
    /// The archive could not be reached or answered unusably.
    Transport(String),
    /// Resolution was cancelled before this action was looked up.
    Cancelled,
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionNeverExisted => write!(f, "version never existed in the archive"),
            Self::ArtifactsUnavailable => write!(f, "all candidate artifacts are gone"),
            Self::Transport(detail) => write!(f, "archive lookup failed: {detail}"),
            Self::Cancelled => write!(f, "resolution cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub key: PackageKey,
    pub version: String,
    pub reason: ResolutionReason,
}

/// An opaque locator for one historical package build in the remote archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub url: String,
    pub filename: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionOutcome {
    /// Removes and no-ops need no artifact.
    NotNeeded,
    /// Primary candidate plus any fallback locations the archive reported.
    Found {
        artifact: ArtifactRef,
        fallbacks: Vec<ArtifactRef>,
    },
    /// Kept in the plan, flagged, never silently dropped.
    Failed(ResolutionFailure),
}

/// A rollback action augmented with its archive resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub action: RollbackAction,
    pub outcome: ResolutionOutcome,
}

impl ResolvedAction {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, ResolutionOutcome::Failed(_))
    }

    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match &self.outcome {
            ResolutionOutcome::Found { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}
