use console::style;
use log::{debug, info, warn};
use std::io;

use process_sandbox::controller::{duration_from_raw_ms, limit_from_raw};
use process_sandbox::{LaunchMode, SandboxBuilder, SandboxConfig, SpecialExitCode};

use crate::cli::Cli;

/// Translate parsed arguments into a sandbox configuration
pub fn config_from_cli(cli: &Cli) -> SandboxConfig {
    let mut config = SandboxConfig {
        program: cli.program.clone(),
        args: cli.args.clone(),
        working_dir: Some(cli.working_dir.clone()),
        user: cli.user.clone().filter(|name| !name.is_empty()),
        total_timeout: duration_from_raw_ms(cli.total_timeout),
        cpu_limit: duration_from_raw_ms(cli.cpu_limit),
        cpu_limit_addition: duration_from_raw_ms(cli.cpu_limit_addition),
        memory_limit: limit_from_raw(cli.memory_limit),
        stdout_limit: limit_from_raw(cli.stdout_limit),
        stderr_limit: limit_from_raw(cli.stderr_limit),
        thread_count_limit: limit_from_raw(cli.thread_count_limit),
        open_file_limit: limit_from_raw(cli.open_file_limit),
        file_size_limit: limit_from_raw(cli.file_size_limit),
        children_forbidden: cli.children_forbidden,
        helper_path: cli.helper.clone(),
        ..Default::default()
    };

    if let Some(interval) = duration_from_raw_ms(cli.poll_interval) {
        config.poll_interval = interval;
    }
    if cli.direct {
        config.launch_mode = LaunchMode::Direct;
    }

    config
}

/// Supervise the program and write the result file, returning the exit code
pub fn run_sandbox(cli: Cli) -> i32 {
    let config = config_from_cli(&cli);
    debug!("Sandbox configuration: {:?}", config);

    let sandbox = match SandboxBuilder::from_config(config)
        .stdin(io::stdin())
        .stdout(io::stdout())
        .stderr(io::stderr())
        .build()
    {
        Ok(sandbox) => sandbox,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return SpecialExitCode::WrongArgs.code();
        }
    };

    info!("Executing: {} {:?}", cli.program, cli.args);

    let statistics = sandbox.run();
    let exit_code = statistics
        .exit_code
        .unwrap_or(SpecialExitCode::UnexpectedError.code());

    info!(
        "exit_code={} elapsed_ms={} cpu_time_ms={} memory_bytes={}",
        exit_code, statistics.elapsed_ms, statistics.cpu_time_ms, statistics.memory_bytes
    );
    if let Some(reason) = &statistics.failure_reason {
        warn!("{}", reason);
    }

    if let Err(e) = statistics.save(&cli.result_file, cli.format.into()) {
        eprintln!(
            "{} cannot write {}: {}",
            style("error:").red().bold(),
            cli.result_file.display(),
            e
        );
    }

    exit_code
}
