//! Kolosal Workbench - command-line entry point

use clap::Parser;
use kolosal_workbench::cli::{report_error, run, Cli};
use kolosal_workbench::config::WorkbenchConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_workbench=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkbenchConfig::from_env();

    if let Err(err) = run(cli, &config) {
        report_error(&err);
        std::process::exit(1);
    }
}
