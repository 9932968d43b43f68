use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{anyhow, bail, Context, Result};
use aptrewind_archive::{resolve_plan, ArchiveClient};
use aptrewind_core::{
    diff_snapshots, filter_snapshot, snapshot_at, ActionKind, PackageEvent, PackageKey,
    ParseWarning, ResolutionFailure, ResolutionOutcome, ResolvedAction,
};
use aptrewind_installer::{
    apply_plan, ActionStatus, ExecutionItem, ExecutionPayload, ExecutionReport, FailurePolicy,
    Installer,
};
use aptrewind_logs::{discover_sources, read_events};
use chrono::NaiveDateTime;

use crate::config::Settings;
use crate::render::{print_section, print_status, OutputStyle, PhaseProgress};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_HELP: &str = "\"YYYY-MM-DD hh:mm:ss\"";

/// How a completed run maps to an exit code: Clean is 0, Partial is 1.
/// Fatal conditions travel as errors and exit 2 before anything mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    Partial,
}

#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub cutoff: NaiveDateTime,
    pub dry_run: bool,
    pub force: bool,
    pub halt_on_failure: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .map_err(|_| anyhow!("timestamp does not match format {TIMESTAMP_HELP}"))
}

/// The full pipeline: parse, replay, diff, resolve, fetch, execute. The
/// archive client, installer, and `now` are injected so the flow itself
/// stays clock-free and network-free under test.
pub fn run_rollback(
    settings: &Settings,
    request: &RollbackRequest,
    now: NaiveDateTime,
    client: &ArchiveClient,
    installer: &Installer,
    style: OutputStyle,
) -> Result<RunStatus> {
    let (events, warnings) = load_events(settings)?;
    validate_window(&events, request.cutoff, now)?;

    if !warnings.is_empty() {
        print_status(
            style,
            "warn",
            &format!("{} unparseable log line(s) skipped", warnings.len()),
        );
    }

    let current = filter_snapshot(
        &snapshot_at(&events, now),
        &request.include,
        &request.exclude,
    );
    let target = filter_snapshot(
        &snapshot_at(&events, request.cutoff),
        &request.include,
        &request.exclude,
    );

    let plan = diff_snapshots(&current, &target);
    if plan.is_empty() {
        print_status(style, "ok", "nothing to revert");
        return Ok(RunStatus::Clean);
    }

    print_section(style, "Plan");
    for action in &plan {
        print_status(style, "step", &action.to_string());
    }

    let cancel = AtomicBool::new(false);

    print_section(style, "Resolve");
    let resolved = resolve_plan(&plan, client, settings.parallel, &cancel);
    let failures = resolution_failures(&resolved);
    for failure in &failures {
        print_status(
            style,
            "fail",
            &format!("{} {}: {}", failure.key, failure.version, failure.reason),
        );
    }

    if request.dry_run {
        print_status(
            style,
            "ok",
            &format!(
                "dry run: {} action(s) resolved, {} failed; nothing executed",
                resolved.len() - failures.len(),
                failures.len()
            ),
        );
        return Ok(if failures.is_empty() {
            RunStatus::Clean
        } else {
            RunStatus::Partial
        });
    }

    if !failures.is_empty() && !request.force {
        for line in guidance_lines(&failures, &settings.cache_dir) {
            print_status(style, "warn", &line);
        }
        return Ok(RunStatus::Partial);
    }

    print_section(style, "Fetch");
    let fetched = fetch_artifacts(&resolved, client, &settings.cache_dir, style);

    let items = build_execution_items(&resolved, &fetched);
    let policy = if request.halt_on_failure {
        FailurePolicy::HaltOnFirstFailure
    } else {
        FailurePolicy::ContinuePastFailures
    };

    print_section(style, "Apply");
    let report = apply_plan(&items, installer, policy, &cancel);

    print_section(style, "Summary");
    for line in summary_lines(&report, warnings.len()) {
        let label = if line.starts_with("applied") { "ok" } else { "warn" };
        print_status(style, label, &line);
    }
    for result in &report.results {
        match &result.status {
            ActionStatus::Applied => {}
            ActionStatus::Failed(detail) => {
                print_status(style, "fail", &format!("{}: {detail}", result.action))
            }
            ActionStatus::SkippedUnresolved(reason) => {
                print_status(style, "skip", &format!("{}: {reason}", result.action))
            }
            ActionStatus::SkippedCancelled => {
                print_status(style, "skip", &format!("{}: cancelled", result.action))
            }
            ActionStatus::SkippedHalted => {
                print_status(style, "skip", &format!("{}: halted", result.action))
            }
        }
    }

    Ok(if report.fully_applied() {
        RunStatus::Clean
    } else {
        RunStatus::Partial
    })
}

/// Renders the merged event stream, newest last. A package filter narrows to
/// one name across all architectures.
pub fn run_history(
    settings: &Settings,
    package: Option<&str>,
    limit: Option<usize>,
    style: OutputStyle,
) -> Result<RunStatus> {
    let (events, warnings) = load_events(settings)?;

    let matching: Vec<&PackageEvent> = events
        .iter()
        .filter(|event| package.is_none_or(|name| event.key.name == name))
        .collect();

    let start = limit
        .map(|limit| matching.len().saturating_sub(limit))
        .unwrap_or(0);

    if matching.is_empty() {
        print_status(style, "ok", "no matching package events");
    }
    for event in &matching[start..] {
        println!("{}", history_line(event));
    }

    if !warnings.is_empty() {
        print_status(
            style,
            "warn",
            &format!("{} unparseable log line(s) skipped", warnings.len()),
        );
    }
    Ok(RunStatus::Clean)
}

fn load_events(settings: &Settings) -> Result<(Vec<PackageEvent>, Vec<ParseWarning>)> {
    let sources = discover_sources(&settings.log_root).with_context(|| {
        format!(
            "failed to scan for package manager logs under {}",
            settings.log_root.display()
        )
    })?;
    if sources.is_empty() {
        bail!(
            "no package manager logs found under {}",
            settings.log_root.display()
        );
    }

    let (events, warnings) = read_events(&sources)?;
    if events.is_empty() {
        bail!("the logs contain no package events; nothing to reconstruct");
    }
    Ok((events, warnings))
}

/// The conditions that make the whole plan meaningless. Checked before any
/// resolution or mutation; violations are fatal.
pub fn validate_window(
    events: &[PackageEvent],
    cutoff: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<()> {
    if cutoff > now {
        bail!(
            "target time {} is in the future",
            cutoff.format(TIMESTAMP_FORMAT)
        );
    }
    if let Some(earliest) = events.first() {
        if cutoff < earliest.timestamp {
            bail!(
                "target time {} predates the earliest known event ({})",
                cutoff.format(TIMESTAMP_FORMAT),
                earliest.timestamp.format(TIMESTAMP_FORMAT)
            );
        }
    }
    Ok(())
}

pub fn resolution_failures(resolved: &[ResolvedAction]) -> Vec<ResolutionFailure> {
    resolved
        .iter()
        .filter_map(|entry| match &entry.outcome {
            ResolutionOutcome::Failed(failure) => Some(failure.clone()),
            _ => None,
        })
        .collect()
}

/// When resolution comes up short, tell the operator exactly which builds
/// to fetch by hand, where to put them, and how to proceed regardless.
pub fn guidance_lines(failures: &[ResolutionFailure], cache_dir: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "{} package version(s) could not be resolved; nothing was executed",
        failures.len()
    )];
    for failure in failures {
        lines.push(format!("  {} {}", failure.key, failure.version));
    }
    lines.push(format!(
        "download them manually into {} and re-run, or re-run with --force to skip them",
        cache_dir.display()
    ));
    lines
}

fn fetch_artifacts(
    resolved: &[ResolvedAction],
    client: &ArchiveClient,
    cache_dir: &Path,
    style: OutputStyle,
) -> BTreeMap<PackageKey, std::result::Result<PathBuf, String>> {
    let downloads: Vec<&ResolvedAction> = resolved
        .iter()
        .filter(|entry| matches!(entry.outcome, ResolutionOutcome::Found { .. }))
        .collect();

    let progress = PhaseProgress::start(style, "fetch", downloads.len() as u64);
    let mut fetched = BTreeMap::new();
    for entry in downloads {
        let ResolutionOutcome::Found {
            artifact,
            fallbacks,
        } = &entry.outcome
        else {
            continue;
        };
        let outcome = client
            .fetch_with_fallbacks(artifact, fallbacks, cache_dir)
            .map_err(|error| format!("{error:#}"));
        fetched.insert(entry.action.key.clone(), outcome);
        progress.tick();
    }
    progress.finish();
    fetched
}

/// Pairs each resolved action with what the installer needs, in plan order.
/// Resolution and fetch failures become unresolved items so the executor can
/// report them without attempting them.
pub fn build_execution_items(
    resolved: &[ResolvedAction],
    fetched: &BTreeMap<PackageKey, std::result::Result<PathBuf, String>>,
) -> Vec<ExecutionItem> {
    resolved
        .iter()
        .map(|entry| {
            let payload = match (&entry.outcome, entry.action.kind) {
                (ResolutionOutcome::Failed(failure), _) => {
                    ExecutionPayload::Unresolved(failure.reason.to_string())
                }
                (_, ActionKind::RemoveCompletely) => ExecutionPayload::PackageName,
                (ResolutionOutcome::Found { .. }, _) => {
                    match fetched.get(&entry.action.key) {
                        Some(Ok(path)) => ExecutionPayload::DebFile(path.clone()),
                        Some(Err(reason)) => {
                            ExecutionPayload::Unresolved(format!("fetch failed: {reason}"))
                        }
                        None => ExecutionPayload::Unresolved("artifact never fetched".to_string()),
                    }
                }
                (ResolutionOutcome::NotNeeded, _) => ExecutionPayload::PackageName,
            };
            ExecutionItem {
                action: entry.action.clone(),
                payload,
            }
        })
        .collect()
}

pub fn summary_lines(report: &ExecutionReport, warning_count: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "applied {} of {} action(s)",
        report.applied(),
        report.results.len()
    )];
    if report.failed() > 0 {
        lines.push(format!("{} action(s) failed or were unresolved", report.failed()));
    }
    if report.skipped() > 0 {
        lines.push(format!("{} action(s) skipped", report.skipped()));
    }
    if warning_count > 0 {
        lines.push(format!("{warning_count} log line(s) could not be parsed"));
    }
    lines
}

pub fn history_line(event: &PackageEvent) -> String {
    let transition = match (
        event.version_before.as_deref(),
        event.version_after.as_deref(),
    ) {
        (Some(before), Some(after)) if before != after => format!("{before} -> {after}"),
        (_, Some(after)) => after.to_string(),
        (Some(before), None) => before.to_string(),
        (None, None) => String::new(),
    };
    format!(
        "[{}] {:<16} {} {}",
        event.timestamp.format(TIMESTAMP_FORMAT),
        event.kind.as_str(),
        event.key,
        transition
    )
    .trim_end()
    .to_string()
}
