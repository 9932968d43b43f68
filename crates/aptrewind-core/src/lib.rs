mod event;
mod plan;
mod snapshot;

pub use event::{EventKind, PackageEvent, PackageKey, ParseWarning};
pub use plan::{
    diff_snapshots, ActionKind, ArtifactRef, ResolutionFailure, ResolutionOutcome,
    ResolutionReason, ResolvedAction, RollbackAction,
};
pub use snapshot::{filter_snapshot, snapshot_at, PackageSnapshot, PackageState};
