// src/main.rs

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod orchestrator;
mod sys;

use crate::config::{LogFormat, ProvisionConfig};
use crate::orchestrator::Orchestrator;
use crate::sys::host::LinuxHost;
use crate::sys::prompt::TerminalGate;
use crate::sys::status;

#[derive(Parser)]
#[command(name = "blurcam-provision", version, about = "Sets up the BlurCam virtual camera on this machine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Report what is installed without changing anything
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(config: &ProvisionConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ==============================================================================
    // 1. Configuration & Logging
    // ==============================================================================

    let cli = Cli::parse();
    let config = match ProvisionConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("blurcam-provision: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let host = Arc::new(LinuxHost::new());

    // ==============================================================================
    // 2. Read-only status
    // ==============================================================================

    if let Some(Command::Status { json }) = cli.command {
        let report = status::collect(host, &config).await;
        if json {
            match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    error!("could not encode status: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            print!("{}", report.render());
        }
        return if report.is_healthy() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    // ==============================================================================
    // 3. Provisioning run
    // ==============================================================================

    info!("📷 BlurCam setup starting");
    let orchestrator = Orchestrator::new(host, Arc::new(TerminalGate::stdio()), &config);
    let report = orchestrator.run().await;

    for note in &report.advisories {
        warn!("👉 {note}");
    }
    if !report.warnings.is_empty() {
        warn!("Finished with {} warning(s); see above", report.warnings.len());
    }
    if let Some(err) = &report.error {
        error!("❌ {err}");
        error!("Setup aborted; fix the problem above and re-run. Completed steps are kept.");
    }

    ExitCode::from(report.exit_code())
}
