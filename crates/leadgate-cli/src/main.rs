mod cli;
mod commands;
mod error;
mod metadata;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;
use crate::metadata::RequestId;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let request_id = RequestId::new_v4();
    let envelope = commands::run(&cli, request_id)
        .instrument(tracing::info_span!("command", %request_id))
        .await?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    writeln!(std::io::stdout().lock(), "{rendered}")?;

    if envelope.error.is_some() {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // A global subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
