use std::process::ExitCode;

use clap::Parser;
use emotrack_lib::cli::Cli;

fn main() -> ExitCode {
    match emotrack_lib::run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
