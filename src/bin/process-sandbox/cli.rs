use clap::builder::FalseyValueParser;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use process_sandbox::ReportFormat;

#[derive(Parser, Debug)]
#[command(name = "process-sandbox")]
#[command(version, about = "Run a program under CPU, memory, output and time limits", long_about = None)]
#[command(after_help = "Limits left at -1 are not enforced. Times are in milliseconds.

EXAMPLES:
    # 1 second of CPU, 64 MiB of memory, 5 seconds wall clock
    process-sandbox --cpu-limit 1000 --memory-limit 67108864 --total-timeout 5000 \\
        result.txt /tmp/work ./solution

    # Same, configured from the environment
    SANDBOX_CPU_LIMIT=1000 SANDBOX_CHILDREN_FORBIDDEN=1 \\
        process-sandbox result.txt . python3 solution.py
")]
pub struct Cli {
    /// File receiving the run statistics
    #[arg(value_name = "RESULT_FILE")]
    pub result_file: PathBuf,

    /// Working directory of the program
    #[arg(value_name = "WORKING_DIR")]
    pub working_dir: PathBuf,

    /// Program to run; later arguments, `--` included, belong to it
    #[arg(value_name = "COMMAND", allow_hyphen_values = true)]
    pub program: String,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Run the program as this user
    #[arg(short, long, value_name = "NAME", env = "SANDBOX_USER")]
    pub user: Option<String>,

    /// Wall-clock limit in milliseconds
    #[arg(short, long, value_name = "MS", env = "SANDBOX_TOTAL_TIMEOUT", default_value_t = -1, allow_negative_numbers = true)]
    pub total_timeout: i64,

    /// CPU time limit in milliseconds
    #[arg(short, long, value_name = "MS", env = "SANDBOX_CPU_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub cpu_limit: i64,

    /// Extra CPU milliseconds granted to the kernel backstop limit
    #[arg(long, value_name = "MS", env = "SANDBOX_CPU_LIMIT_ADDITION", default_value_t = -1, allow_negative_numbers = true)]
    pub cpu_limit_addition: i64,

    /// Memory limit in bytes
    #[arg(short, long, value_name = "BYTES", env = "SANDBOX_MEMORY_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub memory_limit: i64,

    /// Characters of stdout passed through
    #[arg(long, value_name = "CHARS", env = "SANDBOX_STDOUT_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub stdout_limit: i64,

    /// Characters of stderr passed through
    #[arg(long, value_name = "CHARS", env = "SANDBOX_STDERR_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub stderr_limit: i64,

    /// Processes and threads the user may own
    #[arg(long, value_name = "COUNT", env = "SANDBOX_THREAD_COUNT_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub thread_count_limit: i64,

    /// Largest file the program may write, in bytes
    #[arg(long, value_name = "BYTES", env = "SANDBOX_FILE_SIZE_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub file_size_limit: i64,

    /// Open file descriptors
    #[arg(long, value_name = "COUNT", env = "SANDBOX_OPEN_FILE_LIMIT", default_value_t = -1, allow_negative_numbers = true)]
    pub open_file_limit: i64,

    /// Kill the program if it spawns child processes
    #[arg(long, env = "SANDBOX_CHILDREN_FORBIDDEN", value_parser = FalseyValueParser::new())]
    pub children_forbidden: bool,

    /// Resource poll interval in milliseconds
    #[arg(long, value_name = "MS", env = "SANDBOX_POLL_INTERVAL", default_value_t = -1, allow_negative_numbers = true)]
    pub poll_interval: i64,

    /// Result file layout
    #[arg(short, long, value_enum, default_value_t = Format::Lines)]
    pub format: Format,

    /// Path of the sandbox-exec helper
    #[arg(long, value_name = "PATH")]
    pub helper: Option<PathBuf>,

    /// Launch without the sandbox-exec helper
    #[arg(long)]
    pub direct: bool,

    /// Show verbose output
    #[arg(short, long, env = "SANDBOX_VERBOSE", value_parser = FalseyValueParser::new())]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// One value per line
    Lines,
    /// JSON object
    Json,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Lines => ReportFormat::Lines,
            Format::Json => ReportFormat::Json,
        }
    }
}
