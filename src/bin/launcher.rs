use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

use pr_mailbot::launcher::{ChildSpec, LaunchOutcome, Launcher};
use pr_mailbot::shutdown::shutdown_signal;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run the API server and the UI side by side; stop both on Ctrl+C/SIGTERM"
)]
struct Args {
    /// API server executable (defaults to `pr-mailbot` next to this binary)
    #[arg(long)]
    api_bin: Option<PathBuf>,

    /// Config file passed through to the API server
    #[arg(long)]
    config: Option<PathBuf>,

    /// UI command line, e.g. "streamlit run main.py"
    #[arg(long)]
    ui: Option<String>,

    /// Seconds a process may take to exit on its own before it is killed
    #[arg(long, default_value = "5")]
    grace_secs: u64,
}

fn default_api_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate launcher executable")?;
    Ok(exe.with_file_name(format!("pr-mailbot{}", std::env::consts::EXE_SUFFIX)))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let api_bin = match args.api_bin {
        Some(path) => path,
        None => default_api_bin()?,
    };
    let mut api = ChildSpec::new("api", api_bin.to_string_lossy());
    if let Some(config) = &args.config {
        api = api.arg("--config").arg(config.to_string_lossy());
    }

    let mut specs = vec![api];
    match args.ui.as_deref().map(|line| ChildSpec::from_command_line("ui", line)) {
        Some(Some(ui)) => specs.push(ui),
        Some(None) => error!("--ui is empty; starting the API only"),
        None => info!("no UI command given; starting the API only"),
    }

    let launcher = Launcher::spawn(&specs, Duration::from_secs(args.grace_secs))?;
    match launcher.run_until(shutdown_signal()).await? {
        LaunchOutcome::Signal(_) => Ok(ExitCode::SUCCESS),
        LaunchOutcome::ChildExited { success: true, .. } => Ok(ExitCode::SUCCESS),
        LaunchOutcome::ChildExited { name, success: false } => {
            error!(%name, "process failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
