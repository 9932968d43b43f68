use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use aptrewind_core::{
    ActionKind, ResolutionFailure, ResolutionOutcome, ResolutionReason, ResolvedAction,
    RollbackAction,
};

use crate::{ArchiveClient, LookupResult};

/// Resolves every action in the plan against the archive. Lookups are
/// independent per package, so they run on a bounded pool of scoped worker
/// threads; output order always equals plan order regardless of completion
/// order. Failures become flagged outcomes, never errors; the caller
/// decides whether an incomplete resolution aborts, skips, or proceeds.
///
/// Once `cancel` is raised no new lookups are issued; in-flight ones finish
/// and every action not yet started resolves as cancelled.
pub fn resolve_plan(
    actions: &[RollbackAction],
    client: &ArchiveClient,
    parallelism: usize,
    cancel: &AtomicBool,
) -> Vec<ResolvedAction> {
    let mut slots: Vec<Option<ResolvedAction>> = Vec::new();
    slots.resize_with(actions.len(), || None);
    let slots = Mutex::new(slots);
    let cursor = AtomicUsize::new(0);
    let workers = parallelism.clamp(1, actions.len().max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(action) = actions.get(index) else {
                    break;
                };
                let resolved = resolve_one(action, client, cancel);
                let mut slots = slots.lock().expect("resolver slot lock");
                slots[index] = Some(resolved);
            });
        }
    });

    slots
        .into_inner()
        .expect("resolver slot lock")
        .into_iter()
        .map(|slot| slot.expect("every plan slot resolved"))
        .collect()
}

fn resolve_one(
    action: &RollbackAction,
    client: &ArchiveClient,
    cancel: &AtomicBool,
) -> ResolvedAction {
    // Removes and no-ops need no artifact; they resolve without a lookup
    // even under cancellation.
    if action.kind != ActionKind::InstallVersion {
        return ResolvedAction {
            action: action.clone(),
            outcome: ResolutionOutcome::NotNeeded,
        };
    }

    let version = action
        .target_version
        .clone()
        .unwrap_or_default();

    if cancel.load(Ordering::SeqCst) {
        return failed(action, &version, ResolutionReason::Cancelled);
    }

    match client.lookup(&action.key, &version) {
        Ok(LookupResult::UnknownVersion) => {
            failed(action, &version, ResolutionReason::VersionNeverExisted)
        }
        Ok(LookupResult::Found(candidates)) if candidates.is_empty() => {
            failed(action, &version, ResolutionReason::ArtifactsUnavailable)
        }
        Ok(LookupResult::Found(mut candidates)) => {
            let artifact = candidates.remove(0);
            ResolvedAction {
                action: action.clone(),
                outcome: ResolutionOutcome::Found {
                    artifact,
                    fallbacks: candidates,
                },
            }
        }
        Err(error) => failed(
            action,
            &version,
            ResolutionReason::Transport(format!("{error:#}")),
        ),
    }
}

fn failed(action: &RollbackAction, version: &str, reason: ResolutionReason) -> ResolvedAction {
    ResolvedAction {
        action: action.clone(),
        outcome: ResolutionOutcome::Failed(ResolutionFailure {
            key: action.key.clone(),
            version: version.to_string(),
            reason,
        }),
    }
}
