// Entrypoint for the CLI.
// - Keeps `main` small: set up logging, parse arguments, hand off to `cli`.
// - Any error that reaches here is fatal: it is printed and the process
//   exits non-zero. Batch and verification failures never get this far.

use clap::Parser;
use lgp_import::cli::{self, Cli};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the report.
    let default_filter = match cli.verbose {
        0 => "lgp_import=warn",
        1 => "lgp_import=info",
        _ => "lgp_import=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
