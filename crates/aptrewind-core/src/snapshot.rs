use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::event::{EventKind, PackageEvent, PackageKey};

/// Per-package state inside a snapshot. `version` survives a Remove so the
/// diff can show what used to be installed; Purge clears it. `pending` holds
/// a version that has been unpacked but not yet fully configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub version: Option<String>,
    pub present: bool,
    pub pending: Option<String>,
}

impl PackageState {
    pub fn installed_version(&self) -> Option<&str> {
        if self.present {
            self.version.as_deref()
        } else {
            None
        }
    }
}

/// The installed package set as of a specific instant, derived by replaying
/// events up to a cutoff. Never mutated after construction; two snapshots are
/// compared, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub taken_at: NaiveDateTime,
    pub packages: BTreeMap<PackageKey, PackageState>,
}

impl PackageSnapshot {
    pub fn installed_version(&self, key: &PackageKey) -> Option<&str> {
        self.packages.get(key).and_then(PackageState::installed_version)
    }

    pub fn installed_count(&self) -> usize {
        self.packages.values().filter(|state| state.present).count()
    }
}

/// Replays `events` with `timestamp <= cutoff` into a snapshot. The fold is
/// pure: same events and cutoff always produce an identical snapshot. Events
/// must already be in merged order; entries past the cutoff are ignored, not
/// an error.
pub fn snapshot_at(events: &[PackageEvent], cutoff: NaiveDateTime) -> PackageSnapshot {
    let mut packages: BTreeMap<PackageKey, PackageState> = BTreeMap::new();

    for event in events {
        if event.timestamp > cutoff {
            continue;
        }

        match event.kind {
            EventKind::Install | EventKind::Upgrade | EventKind::Downgrade => {
                let state = packages.entry(event.key.clone()).or_default();
                state.present = true;
                state.version = event.version_after.clone();
                state.pending = event.version_after.clone();
            }
            EventKind::Remove => {
                let state = packages.entry(event.key.clone()).or_default();
                state.present = false;
                state.pending = None;
            }
            EventKind::Purge => {
                let state = packages.entry(event.key.clone()).or_default();
                state.present = false;
                state.version = None;
                state.pending = None;
            }
            EventKind::ConfigureFull => {
                let state = packages.entry(event.key.clone()).or_default();
                let configured = state.pending.take().or_else(|| event.version_after.clone());
                if configured.is_some() {
                    state.version = configured;
                    state.present = true;
                }
            }
            EventKind::ConfigureHalf | EventKind::TriggersPending | EventKind::Unknown => {}
        }
    }

    PackageSnapshot {
        taken_at: cutoff,
        packages,
    }
}

/// Restricts a snapshot to the packages the caller asked about. An empty
/// include list means "everything"; excludes always win. Filters match on
/// package name, not on `name:arch`, so one flag covers all architectures.
pub fn filter_snapshot(
    snapshot: &PackageSnapshot,
    include: &[String],
    exclude: &[String],
) -> PackageSnapshot {
    let packages = snapshot
        .packages
        .iter()
        .filter(|(key, _)| include.is_empty() || include.iter().any(|name| *name == key.name))
        .filter(|(key, _)| !exclude.iter().any(|name| *name == key.name))
        .map(|(key, state)| (key.clone(), state.clone()))
        .collect();

    PackageSnapshot {
        taken_at: snapshot.taken_at,
        packages,
    }
}
