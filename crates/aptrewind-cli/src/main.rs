use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use aptrewind_archive::{ArchiveClient, SnapshotArchive};
use aptrewind_installer::{DpkgInstaller, Installer};
use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod config;
mod flows;
mod render;

use config::{load_config, Settings, SettingsOverrides};
use flows::{parse_timestamp, run_history, run_rollback, RollbackRequest, RunStatus};
use render::{output_style, render_status_line, OutputStyle};

#[derive(Parser, Debug)]
#[command(name = "aptrewind")]
#[command(about = "Rewind a Debian system's package state to a past point in time", long_about = None)]
struct Cli {
    /// Config file (default: /etc/aptrewind.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Disable colors and progress bars
    #[arg(long, global = true)]
    plain: bool,
    #[arg(long, global = true)]
    log_root: Option<PathBuf>,
    #[arg(long, global = true)]
    archive_url: Option<String>,
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute and execute the plan that restores the package state at TIMESTAMP
    Rollback {
        /// Target time, "YYYY-MM-DD hh:mm:ss"
        timestamp: String,
        /// Run the pipeline through resolution but execute nothing
        #[arg(long)]
        dry_run: bool,
        /// Proceed even when some package versions could not be resolved
        #[arg(short, long)]
        force: bool,
        /// Stop at the first failed installer action instead of continuing
        #[arg(long)]
        halt_on_failure: bool,
        /// Only consider these package names (repeatable)
        #[arg(long)]
        include: Vec<String>,
        /// Never touch these package names (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Concurrent archive lookups
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Show the rollback plan for TIMESTAMP without executing it
    Plan {
        timestamp: String,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Show the reconstructed package event history
    History {
        /// Limit to one package name
        #[arg(long)]
        package: Option<String>,
        /// Show only the most recent N events
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let style = output_style(cli.plain);

    match run(cli, style) {
        Ok(RunStatus::Clean) => ExitCode::SUCCESS,
        Ok(RunStatus::Partial) => ExitCode::from(1),
        Err(error) => {
            eprintln!("{}", render_status_line(style, "error", &format!("{error:#}")));
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli, style: OutputStyle) -> Result<RunStatus> {
    let file = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Rollback {
            timestamp,
            dry_run,
            force,
            halt_on_failure,
            include,
            exclude,
            parallel,
        } => {
            let settings = resolve_settings(file, &cli.log_root, &cli.archive_url, &cli.cache_dir, parallel);
            let request = RollbackRequest {
                cutoff: parse_timestamp(&timestamp)?,
                dry_run,
                force,
                halt_on_failure,
                include,
                exclude,
            };
            let client = snapshot_client(&settings)?;
            let installer = Installer::Dpkg(DpkgInstaller::default());
            run_rollback(
                &settings,
                &request,
                Local::now().naive_local(),
                &client,
                &installer,
                style,
            )
        }
        Commands::Plan {
            timestamp,
            include,
            exclude,
            parallel,
        } => {
            let settings = resolve_settings(file, &cli.log_root, &cli.archive_url, &cli.cache_dir, parallel);
            let request = RollbackRequest {
                cutoff: parse_timestamp(&timestamp)?,
                dry_run: true,
                force: false,
                halt_on_failure: false,
                include,
                exclude,
            };
            let client = snapshot_client(&settings)?;
            let installer = Installer::Dpkg(DpkgInstaller::default());
            run_rollback(
                &settings,
                &request,
                Local::now().naive_local(),
                &client,
                &installer,
                style,
            )
        }
        Commands::History { package, limit } => {
            let settings = resolve_settings(file, &cli.log_root, &cli.archive_url, &cli.cache_dir, None);
            run_history(&settings, package.as_deref(), limit, style)
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(RunStatus::Clean)
        }
    }
}

fn snapshot_client(settings: &Settings) -> Result<ArchiveClient> {
    Ok(ArchiveClient::Snapshot(SnapshotArchive::new(
        &settings.archive_url,
        Duration::from_secs(settings.http_timeout_secs),
    )?))
}

fn resolve_settings(
    file: config::ConfigFile,
    log_root: &Option<PathBuf>,
    archive_url: &Option<String>,
    cache_dir: &Option<PathBuf>,
    parallel: Option<usize>,
) -> Settings {
    Settings::resolve(
        file,
        SettingsOverrides {
            log_root: log_root.clone(),
            archive_url: archive_url.clone(),
            cache_dir: cache_dir.clone(),
            parallel,
        },
    )
}

#[cfg(test)]
mod tests;
