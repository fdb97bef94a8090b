//! jetforge - GPU-stack provisioning tool for NVIDIA Jetson boards
//!
//! Thin CLI over the orchestration core: list the version catalog,
//! trigger CUDA/OpenCV installs, and inspect persisted run state. Exit
//! codes are distinct per failure class so scripts can branch on them.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use jetforge_core::cache::PackageCache;
use jetforge_core::catalog::{Component, VersionCatalog};
use jetforge_core::config::Config;
use jetforge_core::error::InstallError;
use jetforge_core::fetch::HttpFetcher;
use jetforge_core::orchestrator::Orchestrator;
use jetforge_core::pipeline::{InstallRun, RunStatus, ShellExecutor};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "jetforge",
    about = "Provisions NVIDIA Jetson boards with the GPU acceleration stack",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Override the package cache root directory
    #[clap(long, global = true)]
    cache_root: Option<PathBuf>,

    /// Override the configuration file path
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// List components with their known versions and defaults
    ListVersions {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Install the CUDA toolchain (cuDNN, TensorRT, VPI included)
    InstallCuda {
        /// Specific version to install (defaults to the catalog default)
        #[clap(long)]
        version: Option<String>,
    },

    /// Build and install OpenCV with CUDA enabled
    InstallOpencv {
        /// Specific version to install (defaults to the catalog default)
        #[clap(long)]
        version: Option<String>,
    },

    /// Show the persisted state of a component's last install run
    Status {
        /// Component to inspect (cuda or opencv)
        component: Component,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<InstallError>() {
                Some(install_err) => ExitCode::from(install_err.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(cache_root) = cli.cache_root {
        config.cache_root = cache_root;
    }

    match cli.command {
        Command::ListVersions { json } => execute_list_versions(json),
        Command::InstallCuda { version } => {
            execute_install(&config, Component::Cuda, version.as_deref()).await
        }
        Command::InstallOpencv { version } => {
            execute_install(&config, Component::OpenCv, version.as_deref()).await
        }
        Command::Status { component, json } => execute_status(&config, component, json),
    }
}

/// Table row for the version listing
#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Default")]
    default_marker: String,
    #[tabled(rename = "Source")]
    source: String,
}

fn execute_list_versions(json_output: bool) -> Result<()> {
    let catalog = VersionCatalog::builtin();
    let entries = catalog.list_versions();

    if json_output {
        let json_entries: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "component": entry.component.to_string(),
                    "version": entry.version,
                    "default": entry.is_default,
                    "sourceUrl": entry.source_url,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_entries)?);
        return Ok(());
    }

    let rows: Vec<VersionRow> = entries
        .iter()
        .map(|entry| {
            let default_marker = if entry.is_default { "*" } else { "" };
            VersionRow {
                component: entry.component.to_string(),
                version: entry.version.clone(),
                default_marker: default_marker.to_string(),
                source: entry.source_url.clone(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    println!("{table}");
    println!("\n* = installed when no --version is given");
    Ok(())
}

async fn execute_install(
    config: &Config,
    component: Component,
    version: Option<&str>,
) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::new()?);
    let orchestrator = Orchestrator::new(config, fetcher, Arc::new(ShellExecutor));

    // Ctrl-C cancels the running fetch or step; the run record stays
    // resumable.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling install");
            signal_cancel.cancel();
        }
    });

    let run = orchestrator
        .install_with_cancel(component, version, cancel)
        .await?;

    println!(
        "{} {} installed: {} steps run, {} already in place",
        component,
        run.version,
        run.steps_total - run.steps_skipped.len(),
        run.steps_skipped.len()
    );
    Ok(())
}

fn execute_status(config: &Config, component: Component, json_output: bool) -> Result<()> {
    // Status is a pure read of persisted state; it never contends with
    // a running install.
    let cache = PackageCache::new(&config.cache_root);
    let Some(run) = InstallRun::load(&cache.component_dir(component)) else {
        println!("No install has been recorded for {component}.");
        return Ok(());
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!("Component:  {component}");
    println!("Version:    {}", run.version);
    println!("Run id:     {}", run.id);
    println!("Status:     {:?}", run.status);
    println!("Started:    {}", run.started_at.to_rfc3339());
    if let Some(finished_at) = run.finished_at {
        println!("Finished:   {}", finished_at.to_rfc3339());
    }
    println!(
        "Progress:   step {}/{} ({} skipped)",
        run.current_step_index,
        run.steps_total,
        run.steps_skipped.len()
    );
    if let Some(last_error) = &run.last_error {
        println!("Last error: {last_error}");
    }
    if run.status == RunStatus::Failed {
        println!("\nRe-run the install to resume from the failed step.");
    }
    Ok(())
}
