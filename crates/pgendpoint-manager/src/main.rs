//! Entry point for the PostgreSQL endpoint manager.
//!
//! Runs one reconciliation cycle and exits: 0 on success or no change, 1 on
//! any failure, 130 when interrupted.

use std::process::ExitCode;

use clap::Parser;
use pgendpoint_common::RunOutcome;
use pgendpoint_manager::{
    model::config::{Cli, Configuration},
    startup,
};
use tracing::{error, info, info_span, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // kube uses rustls; an already installed provider is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let configuration = match Configuration::load(&cli) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _logging_guard = match startup::init_logging(&configuration.logging_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let root = info_span!("endpoint_manager", dry_run = configuration.dry_run());

    let reconciler = match startup::build_reconciler(&configuration, &root).await {
        Ok(reconciler) => reconciler,
        Err(e) => {
            error!(parent: &root, error = %format!("{:#}", e), "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let status = tokio::select! {
        result = reconciler.run() => {
            match &result {
                Ok(RunOutcome::Published { signature, previous }) => {
                    info!(parent: &root, signature = %signature, previous = ?previous, "Endpoints published");
                }
                Ok(RunOutcome::Unchanged { signature }) => {
                    info!(parent: &root, signature = %signature, "Endpoints already current");
                }
                Err(e) => {
                    error!(parent: &root, error = %e, error_type = e.kind(), "Reconciliation failed");
                }
            }
            startup::exit_status(&result)
        },
        _ = tokio::signal::ctrl_c() => {
            warn!(parent: &root, "Operation interrupted by user");
            startup::EXIT_INTERRUPTED
        }
    };
    ExitCode::from(status)
}
