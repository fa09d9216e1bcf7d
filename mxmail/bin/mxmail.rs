use std::process::ExitCode;

use clap::Parser;
use mxmail::Cli;
use mxmail_common::logging;

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit here with clap's status 2, before any I/O.
    let cli = Cli::parse();
    logging::init();

    match mxmail::run(&cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
