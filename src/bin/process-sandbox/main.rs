//! process-sandbox CLI - supervise one program and record its statistics

mod cli;
mod logging;
mod runner;

use clap::error::ErrorKind;
use clap::Parser;
use cli::Cli;
use process_sandbox::SpecialExitCode;
use runner::run_sandbox;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            let _ = e.print();
            std::process::exit(SpecialExitCode::WrongArgs.code());
        }
    };

    logging::init_logger(cli.verbose);

    std::process::exit(run_sandbox(cli));
}
