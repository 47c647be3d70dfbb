use omega_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // The console belongs to the status reporter, so logs go to a file.
    if let Err(e) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable, using stderr: {:#}", e);
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("omega error: {:#}", err);
        std::process::exit(1);
    }
}
