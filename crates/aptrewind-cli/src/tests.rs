use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use aptrewind_archive::FixtureArchive;
use aptrewind_core::{
    ActionKind, ArtifactRef, PackageKey, ResolutionFailure, ResolutionOutcome, ResolutionReason,
    ResolvedAction, RollbackAction,
};
use aptrewind_installer::{ExecutionPayload, RecordingInstaller};
use chrono::NaiveDateTime;

use super::flows::*;
use super::*;

fn ts(text: &str) -> NaiveDateTime {
    parse_timestamp(text).expect("valid test timestamp")
}

fn key(name: &str) -> PackageKey {
    PackageKey::new(name, "amd64")
}

fn scratch_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("aptrewind-cli-{label}-{nanos}"));
    fs::create_dir_all(&path).expect("must create scratch dir");
    path
}

struct Harness {
    root: PathBuf,
    settings: Settings,
}

impl Harness {
    fn new(label: &str, dpkg_log: &str) -> Self {
        let root = scratch_dir(label);
        let log_root = root.join("log");
        fs::create_dir_all(&log_root).expect("log root");
        fs::write(log_root.join("dpkg.log"), dpkg_log).expect("write dpkg.log");

        let settings = Settings::resolve(
            config::ConfigFile::default(),
            config::SettingsOverrides {
                log_root: Some(log_root),
                archive_url: None,
                cache_dir: Some(root.join("cache")),
                parallel: Some(2),
            },
        );

        Self { root, settings }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn fixture_with(entries: &[(&str, &str)]) -> ArchiveClient {
    let mut fixture = FixtureArchive::new();
    for (name, version) in entries {
        let url = format!("fixture://{name}-{version}");
        fixture.insert_version(
            &key(name),
            version,
            vec![ArtifactRef {
                url: url.clone(),
                filename: format!("{name}_{version}_amd64.deb"),
                size: None,
            }],
        );
        fixture.insert_payload(&url, format!("deb of {name} {version}").into_bytes());
    }
    ArchiveClient::Fixture(fixture)
}

fn recording() -> Installer {
    Installer::Recording(RecordingInstaller::new())
}

fn invocations(installer: &Installer) -> Vec<String> {
    let Installer::Recording(recording) = installer else {
        unreachable!()
    };
    recording.invocations()
}

fn request(cutoff: &str) -> RollbackRequest {
    RollbackRequest {
        cutoff: ts(cutoff),
        dry_run: false,
        force: false,
        halt_on_failure: false,
        include: Vec::new(),
        exclude: Vec::new(),
    }
}

const UPGRADE_LOG: &str = "\
2024-01-10 08:00:00 install foo:amd64 <none> 1.0
2024-02-01 09:30:00 upgrade foo:amd64 1.0 2.0
";

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn timestamp_parsing_matches_documented_format() {
    assert!(parse_timestamp("2024-01-01 00:00:00").is_ok());
    let error = parse_timestamp("yesterday").expect_err("must reject");
    assert!(error.to_string().contains("YYYY-MM-DD hh:mm:ss"));
}

#[test]
fn window_validation_rejects_future_and_prehistoric_targets() {
    let events = vec![aptrewind_core::PackageEvent {
        timestamp: ts("2024-01-10 08:00:00"),
        key: key("foo"),
        kind: aptrewind_core::EventKind::Install,
        version_before: None,
        version_after: Some("1.0".to_string()),
        raw_status: String::new(),
    }];
    let now = ts("2024-06-01 00:00:00");

    assert!(validate_window(&events, ts("2024-03-01 00:00:00"), now).is_ok());

    let future = validate_window(&events, ts("2030-01-01 00:00:00"), now).expect_err("future");
    assert!(future.to_string().contains("future"));

    let early = validate_window(&events, ts("2020-01-01 00:00:00"), now).expect_err("early");
    assert!(early.to_string().contains("earliest known event"));
}

#[test]
fn config_file_parses_and_flags_override() {
    let file = config::ConfigFile::parse(
        r#"
log_root = "/srv/logs"
archive_url = "http://mirror.example/snapshot"
parallel = 8
http_timeout_secs = 5
"#,
    )
    .expect("config parses");

    let settings = Settings::resolve(
        file,
        config::SettingsOverrides {
            log_root: None,
            archive_url: Some("http://flag.example".to_string()),
            cache_dir: None,
            parallel: None,
        },
    );
    assert_eq!(settings.log_root, PathBuf::from("/srv/logs"));
    assert_eq!(settings.archive_url, "http://flag.example");
    assert_eq!(settings.cache_dir, PathBuf::from("/var/cache/aptrewind"));
    assert_eq!(settings.parallel, 8);
    assert_eq!(settings.http_timeout_secs, 5);
}

#[test]
fn config_rejects_malformed_toml() {
    assert!(config::ConfigFile::parse("log_root = [").is_err());
}

#[test]
fn rollback_reverts_simple_upgrade() {
    let harness = Harness::new("revert", UPGRADE_LOG);
    let client = fixture_with(&[("foo", "1.0")]);
    let installer = recording();

    let status = run_rollback(
        &harness.settings,
        &request("2024-01-15 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Clean);
    assert_eq!(invocations(&installer), vec!["install foo:amd64"]);
    assert!(harness
        .settings
        .cache_dir
        .join("foo_1.0_amd64.deb")
        .is_file());
}

#[test]
fn rollback_removes_package_that_did_not_exist_yet() {
    let log = "\
2024-01-10 08:00:00 install foo:amd64 <none> 1.0
2024-02-01 08:00:00 install bar:amd64 <none> 3.1
";
    let harness = Harness::new("remove", log);
    let client = fixture_with(&[]);
    let installer = recording();

    let status = run_rollback(
        &harness.settings,
        &request("2024-01-15 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Clean);
    assert_eq!(invocations(&installer), vec!["purge bar:amd64"]);
}

#[test]
fn unresolvable_version_blocks_execution_without_force() {
    let harness = Harness::new("blocked", UPGRADE_LOG);
    // Archive knows nothing about foo 1.0.
    let client = fixture_with(&[]);
    let installer = recording();

    let status = run_rollback(
        &harness.settings,
        &request("2024-01-15 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Partial);
    assert!(invocations(&installer).is_empty());
}

#[test]
fn unresolvable_version_with_force_still_applies_the_rest() {
    let log = "\
2024-01-10 08:00:00 install foo:amd64 <none> 1.0
2024-01-10 08:00:01 install baz:amd64 <none> 0.9
2024-02-01 09:30:00 upgrade foo:amd64 1.0 2.0
2024-02-01 09:30:01 upgrade baz:amd64 0.9 1.1
";
    let harness = Harness::new("force", log);
    // Only foo's old build survives in the archive; baz 0.9 is gone.
    let client = fixture_with(&[("foo", "1.0")]);
    let installer = recording();

    let mut req = request("2024-01-15 00:00:00");
    req.force = true;
    let status = run_rollback(
        &harness.settings,
        &req,
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    // Partial: baz stays unresolved, foo still executes.
    assert_eq!(status, RunStatus::Partial);
    assert_eq!(invocations(&installer), vec!["install foo:amd64"]);
}

#[test]
fn dry_run_resolves_but_executes_nothing() {
    let harness = Harness::new("dry", UPGRADE_LOG);
    let client = fixture_with(&[("foo", "1.0")]);
    let installer = recording();

    let mut req = request("2024-01-15 00:00:00");
    req.dry_run = true;
    let status = run_rollback(
        &harness.settings,
        &req,
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Clean);
    assert!(invocations(&installer).is_empty());
    assert!(!harness.settings.cache_dir.exists());
}

#[test]
fn exclude_filter_drops_package_before_diff() {
    let harness = Harness::new("exclude", UPGRADE_LOG);
    let client = fixture_with(&[("foo", "1.0")]);
    let installer = recording();

    let mut req = request("2024-01-15 00:00:00");
    req.exclude = vec!["foo".to_string()];
    let status = run_rollback(
        &harness.settings,
        &req,
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Clean);
    assert!(invocations(&installer).is_empty());
}

#[test]
fn identical_snapshots_mean_nothing_to_revert() {
    let harness = Harness::new("noop", UPGRADE_LOG);
    let client = fixture_with(&[]);
    let installer = recording();

    let status = run_rollback(
        &harness.settings,
        &request("2024-03-01 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect("rollback runs");

    assert_eq!(status, RunStatus::Clean);
    assert!(invocations(&installer).is_empty());
}

#[test]
fn future_target_is_fatal() {
    let harness = Harness::new("future", UPGRADE_LOG);
    let client = fixture_with(&[]);
    let installer = recording();

    let error = run_rollback(
        &harness.settings,
        &request("2030-01-01 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .expect_err("must be fatal");
    assert!(error.to_string().contains("future"));
    assert!(invocations(&installer).is_empty());
}

#[test]
fn missing_log_root_is_fatal() {
    let harness = Harness::new("nologs", UPGRADE_LOG);
    let mut settings = harness.settings.clone();
    settings.log_root = harness.root.join("does-not-exist");
    let client = fixture_with(&[]);
    let installer = recording();

    assert!(run_rollback(
        &settings,
        &request("2024-01-15 00:00:00"),
        ts("2024-06-01 00:00:00"),
        &client,
        &installer,
        render::OutputStyle::Plain,
    )
    .is_err());
}

#[test]
fn history_runs_clean_over_scratch_logs() {
    let harness = Harness::new("history", UPGRADE_LOG);
    let status = run_history(
        &harness.settings,
        Some("foo"),
        Some(10),
        render::OutputStyle::Plain,
    )
    .expect("history runs");
    assert_eq!(status, RunStatus::Clean);
}

#[test]
fn execution_items_map_outcomes_to_payloads() {
    let install = RollbackAction {
        key: key("foo"),
        kind: ActionKind::InstallVersion,
        target_version: Some("1.0".to_string()),
        current_version: Some("2.0".to_string()),
    };
    let remove = RollbackAction {
        key: key("bar"),
        kind: ActionKind::RemoveCompletely,
        target_version: None,
        current_version: Some("3.1".to_string()),
    };
    let ghost = RollbackAction {
        key: key("ghost"),
        kind: ActionKind::InstallVersion,
        target_version: Some("0.9".to_string()),
        current_version: None,
    };

    let resolved = vec![
        ResolvedAction {
            action: install.clone(),
            outcome: ResolutionOutcome::Found {
                artifact: ArtifactRef {
                    url: "fixture://foo".to_string(),
                    filename: "foo_1.0_amd64.deb".to_string(),
                    size: None,
                },
                fallbacks: Vec::new(),
            },
        },
        ResolvedAction {
            action: remove.clone(),
            outcome: ResolutionOutcome::NotNeeded,
        },
        ResolvedAction {
            action: ghost.clone(),
            outcome: ResolutionOutcome::Failed(ResolutionFailure {
                key: key("ghost"),
                version: "0.9".to_string(),
                reason: ResolutionReason::VersionNeverExisted,
            }),
        },
    ];

    let mut fetched = BTreeMap::new();
    fetched.insert(key("foo"), Ok(PathBuf::from("/cache/foo_1.0_amd64.deb")));

    let items = build_execution_items(&resolved, &fetched);
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0].payload,
        ExecutionPayload::DebFile(PathBuf::from("/cache/foo_1.0_amd64.deb"))
    );
    assert_eq!(items[1].payload, ExecutionPayload::PackageName);
    assert!(matches!(items[2].payload, ExecutionPayload::Unresolved(_)));
}

#[test]
fn execution_items_surface_fetch_failures() {
    let install = RollbackAction {
        key: key("foo"),
        kind: ActionKind::InstallVersion,
        target_version: Some("1.0".to_string()),
        current_version: None,
    };
    let resolved = vec![ResolvedAction {
        action: install,
        outcome: ResolutionOutcome::Found {
            artifact: ArtifactRef {
                url: "fixture://foo".to_string(),
                filename: "foo_1.0_amd64.deb".to_string(),
                size: None,
            },
            fallbacks: Vec::new(),
        },
    }];

    let mut fetched = BTreeMap::new();
    fetched.insert(key("foo"), Err("connection reset".to_string()));

    let items = build_execution_items(&resolved, &fetched);
    match &items[0].payload {
        ExecutionPayload::Unresolved(reason) => {
            assert!(reason.contains("fetch failed"));
            assert!(reason.contains("connection reset"));
        }
        other => panic!("expected Unresolved, got {other:?}"),
    }
}

#[test]
fn guidance_names_every_failed_version_and_the_cache() {
    let failures = vec![
        ResolutionFailure {
            key: key("baz"),
            version: "0.9".to_string(),
            reason: ResolutionReason::VersionNeverExisted,
        },
        ResolutionFailure {
            key: key("qux"),
            version: "2.2".to_string(),
            reason: ResolutionReason::ArtifactsUnavailable,
        },
    ];

    let lines = guidance_lines(&failures, &PathBuf::from("/var/cache/aptrewind"));
    assert!(lines[0].contains("2 package version(s)"));
    assert!(lines.iter().any(|line| line.contains("baz:amd64 0.9")));
    assert!(lines.iter().any(|line| line.contains("qux:amd64 2.2")));
    assert!(lines
        .iter()
        .any(|line| line.contains("/var/cache/aptrewind") && line.contains("--force")));
}

#[test]
fn summary_counts_every_outcome_class() {
    let applied = RollbackAction {
        key: key("ok"),
        kind: ActionKind::RemoveCompletely,
        target_version: None,
        current_version: Some("1.0".to_string()),
    };
    let report = aptrewind_installer::ExecutionReport {
        results: vec![
            aptrewind_installer::ActionResult {
                action: applied.clone(),
                status: aptrewind_installer::ActionStatus::Applied,
            },
            aptrewind_installer::ActionResult {
                action: applied.clone(),
                status: aptrewind_installer::ActionStatus::Failed("dpkg said no".to_string()),
            },
            aptrewind_installer::ActionResult {
                action: applied,
                status: aptrewind_installer::ActionStatus::SkippedHalted,
            },
        ],
    };

    let lines = summary_lines(&report, 3);
    assert!(lines[0].contains("applied 1 of 3"));
    assert!(lines.iter().any(|line| line.contains("1 action(s) failed")));
    assert!(lines.iter().any(|line| line.contains("1 action(s) skipped")));
    assert!(lines.iter().any(|line| line.contains("3 log line(s)")));
}

#[test]
fn history_lines_show_transitions() {
    let upgrade = aptrewind_core::PackageEvent {
        timestamp: ts("2024-02-01 09:30:00"),
        key: key("foo"),
        kind: aptrewind_core::EventKind::Upgrade,
        version_before: Some("1.0".to_string()),
        version_after: Some("2.0".to_string()),
        raw_status: String::new(),
    };
    let line = history_line(&upgrade);
    assert!(line.contains("[2024-02-01 09:30:00]"));
    assert!(line.contains("upgrade"));
    assert!(line.contains("foo:amd64"));
    assert!(line.contains("1.0 -> 2.0"));

    let remove = aptrewind_core::PackageEvent {
        timestamp: ts("2024-03-01 09:30:00"),
        key: key("foo"),
        kind: aptrewind_core::EventKind::Remove,
        version_before: Some("2.0".to_string()),
        version_after: None,
        raw_status: String::new(),
    };
    assert!(history_line(&remove).ends_with("2.0"));
}
