// auditctl - command-line front end for the audit recorder

use clap::Parser;
use std::process::exit;

use audit_recorder::cli::{run, Cli};
use audit_recorder::config_loader::load_config;
use audit_recorder::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            exit(2);
        }
    };

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialise logging: {e}");
    }

    tracing::debug!(application = %config.application, "configuration loaded");

    if let Err(e) = run(cli, config).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        exit(1);
    }
}
