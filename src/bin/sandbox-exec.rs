//! sandbox-exec - apply rlimits to itself, then exec a command
//!
//! Started by the supervisor's constrained launcher. The limits are inherited
//! by the command and every process it spawns.

use std::os::unix::process::CommandExt;
use std::process::{self, Command};

use clap::{CommandFactory, Parser};
use console::style;
use log::debug;
use nix::unistd::{setpgid, Pid};
use process_sandbox::RlimitConfig;

/// Exit status for malformed arguments
const EXIT_USAGE: i32 = 198;
/// Exit status when the command cannot be executed
const EXIT_EXEC_FAILED: i32 = 199;

#[derive(Parser)]
#[command(name = "sandbox-exec")]
#[command(version, about = "Run a command with the given system limits", long_about = None)]
#[command(after_help = "Pass -1 for a limit to leave it unchanged.

EXAMPLE:
    sandbox-exec 2 64 -1 256 /usr/bin/python3 solution.py
")]
struct Args {
    /// CPU time in seconds (RLIMIT_CPU)
    #[arg(value_name = "CPU", allow_negative_numbers = true)]
    cpu: i64,

    /// Processes and threads of the user (RLIMIT_NPROC)
    #[arg(value_name = "NPROC", allow_negative_numbers = true)]
    nproc: i64,

    /// Largest file the command may write, in bytes (RLIMIT_FSIZE)
    #[arg(value_name = "FSIZE", allow_negative_numbers = true)]
    fsize: i64,

    /// Open file descriptors (RLIMIT_NOFILE)
    #[arg(value_name = "NOFILE", allow_negative_numbers = true)]
    nofile: i64,

    /// Command to execute, looked up on PATH. Everything after it is passed
    /// through untouched, including `--`.
    #[arg(value_name = "COMMAND", allow_hyphen_values = true)]
    command: String,

    /// Command arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            eprintln!("{} {}", style("error:").red().bold(), e.kind());
            let _ = Args::command().print_help();
            process::exit(EXIT_USAGE);
        }
    };

    if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
        debug!("setpgid failed: {}", e);
    }

    let limits = RlimitConfig::from_raw(args.cpu, args.nproc, args.fsize, args.nofile);
    if let Err(e) = limits.apply() {
        debug!("Could not apply all limits: {}", e);
    }

    let err = Command::new(&args.command).args(&args.args).exec();
    eprintln!("sandbox-exec: {}: {}", args.command, err);
    process::exit(EXIT_EXEC_FAILED);
}
