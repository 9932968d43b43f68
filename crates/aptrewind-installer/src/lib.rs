use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use aptrewind_core::{ActionKind, PackageKey, RollbackAction};

// dpkg is not reentrant: at most one installer invocation may be in flight
// process-wide, no matter how many plans are being applied.
static INSTALL_GATE: Mutex<()> = Mutex::new(());

/// What the executor hands to the installer for one action. Unresolved
/// actions stay in the plan so the report can explain them; they are never
/// attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPayload {
    /// A fetched artifact for an install action.
    DebFile(PathBuf),
    /// Removes need only the package name.
    PackageName,
    /// Resolution or fetch failed; carries the reason for the report.
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionItem {
    pub action: RollbackAction,
    pub payload: ExecutionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Applied,
    Failed(String),
    SkippedUnresolved(String),
    SkippedCancelled,
    SkippedHalted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub action: RollbackAction,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub results: Vec<ActionResult>,
}

impl ExecutionReport {
    pub fn applied(&self) -> usize {
        self.count(|status| matches!(status, ActionStatus::Applied))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                ActionStatus::Failed(_) | ActionStatus::SkippedUnresolved(_)
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                ActionStatus::SkippedCancelled | ActionStatus::SkippedHalted
            )
        })
    }

    pub fn fully_applied(&self) -> bool {
        self.results
            .iter()
            .all(|result| matches!(result.status, ActionStatus::Applied))
    }

    fn count(&self, matcher: impl Fn(&ActionStatus) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| matcher(&result.status))
            .count()
    }
}

/// Best-effort execution is the default: one failed action does not stop the
/// rest of the rollback. Halting is an explicit caller choice, and only an
/// installer failure halts; items skipped for missing artifacts never
/// mutated anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    ContinuePastFailures,
    HaltOnFirstFailure,
}

/// The installer capability: the real dpkg, or a recording fake for tests.
#[derive(Debug)]
pub enum Installer {
    Dpkg(DpkgInstaller),
    Recording(RecordingInstaller),
}

impl Installer {
    fn install(&self, key: &PackageKey, deb: &Path) -> Result<()> {
        match self {
            Self::Dpkg(dpkg) => dpkg.install(deb),
            Self::Recording(recording) => recording.record("install", key),
        }
    }

    fn purge(&self, key: &PackageKey) -> Result<()> {
        match self {
            Self::Dpkg(dpkg) => dpkg.purge(key),
            Self::Recording(recording) => recording.record("purge", key),
        }
    }
}

#[derive(Debug)]
pub struct DpkgInstaller {
    dpkg_path: PathBuf,
}

impl DpkgInstaller {
    pub fn new(dpkg_path: impl Into<PathBuf>) -> Self {
        Self {
            dpkg_path: dpkg_path.into(),
        }
    }

    fn install(&self, deb: &Path) -> Result<()> {
        let mut command = self.build_install_command(deb);
        run_installer_command(&mut command, &format!("dpkg -i {}", deb.display()))
    }

    fn purge(&self, key: &PackageKey) -> Result<()> {
        let mut command = self.build_purge_command(key);
        run_installer_command(&mut command, &format!("dpkg --purge {key}"))
    }

    fn build_install_command(&self, deb: &Path) -> Command {
        let mut command = Command::new(&self.dpkg_path);
        command.arg("-i").arg(deb);
        command
    }

    fn build_purge_command(&self, key: &PackageKey) -> Command {
        let mut command = Command::new(&self.dpkg_path);
        command.arg("--purge").arg(key.to_string());
        command
    }
}

impl Default for DpkgInstaller {
    fn default() -> Self {
        Self::new("dpkg")
    }
}

/// Records every invocation instead of touching the system; packages listed
/// in `failures` report a scripted error.
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    calls: Mutex<Vec<String>>,
    failures: BTreeSet<String>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(mut self, package: &str) -> Self {
        self.failures.insert(package.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().expect("recording lock").clone()
    }

    fn record(&self, verb: &str, key: &PackageKey) -> Result<()> {
        self.calls
            .lock()
            .expect("recording lock")
            .push(format!("{verb} {key}"));
        if self.failures.contains(&key.name) {
            return Err(anyhow!("scripted failure for {key}"));
        }
        Ok(())
    }
}

/// Applies the plan in order, one installer invocation at a time, and
/// reports every action's outcome so a partial rollback is always
/// explainable. Cancellation is honored between actions: the in-flight
/// invocation finishes, everything after it is skipped.
pub fn apply_plan(
    items: &[ExecutionItem],
    installer: &Installer,
    policy: FailurePolicy,
    cancel: &AtomicBool,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut halted = false;

    for item in items {
        if halted {
            report.results.push(ActionResult {
                action: item.action.clone(),
                status: ActionStatus::SkippedHalted,
            });
            continue;
        }
        if cancel.load(Ordering::SeqCst) {
            report.results.push(ActionResult {
                action: item.action.clone(),
                status: ActionStatus::SkippedCancelled,
            });
            continue;
        }

        let status = match &item.payload {
            ExecutionPayload::Unresolved(reason) => {
                ActionStatus::SkippedUnresolved(reason.clone())
            }
            ExecutionPayload::DebFile(path) => {
                invoke(installer, &item.action, Some(path.as_path()))
            }
            ExecutionPayload::PackageName => invoke(installer, &item.action, None),
        };

        if matches!(status, ActionStatus::Failed(_)) && policy == FailurePolicy::HaltOnFirstFailure
        {
            halted = true;
        }

        report.results.push(ActionResult {
            action: item.action.clone(),
            status,
        });
    }

    report
}

fn invoke(installer: &Installer, action: &RollbackAction, deb: Option<&Path>) -> ActionStatus {
    let _gate = INSTALL_GATE.lock().expect("installer gate");

    let outcome = match (action.kind, deb) {
        (ActionKind::InstallVersion, Some(path)) => installer.install(&action.key, path),
        (ActionKind::InstallVersion, None) => {
            Err(anyhow!("install action for {} has no artifact", action.key))
        }
        (ActionKind::RemoveCompletely, _) => installer.purge(&action.key),
        (ActionKind::NoOp, _) => Ok(()),
    };

    match outcome {
        Ok(()) => ActionStatus::Applied,
        Err(error) => ActionStatus::Failed(format!("{error:#}")),
    }
}

fn run_installer_command(command: &mut Command, label: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{label}: failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{label}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}
