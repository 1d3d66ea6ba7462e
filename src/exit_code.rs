//! Semantic exit codes and raw exit status translation

use std::fmt;
use std::process::ExitStatus;

/// Exit codes reserved by the sandbox itself.
///
/// Values `0..=199` (and any other raw platform value) belong to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SpecialExitCode {
    /// Wrong number of arguments or malformed arguments
    WrongArgs = 200,
    /// The child could not be spawned
    CannotStartProcess = 201,
    /// Writing to the stdout sink failed
    CannotRedirectStandardOutput = 202,
    /// Writing to the stderr sink failed
    CannotRedirectStandardError = 203,
    /// Feeding stdin failed
    CannotRedirectStandardInput = 204,
    /// Wall-clock timeout exceeded
    TotalTimeout = 205,
    /// CPU time limit exceeded
    CpuLimit = 206,
    /// Memory limit exceeded
    MemoryLimit = 207,
    /// A forbidden child process was detected
    HadChildren = 208,
    /// Internal fault in the supervisor
    UnexpectedError = 209,
}

impl SpecialExitCode {
    pub const ALL: [SpecialExitCode; 10] = [
        SpecialExitCode::WrongArgs,
        SpecialExitCode::CannotStartProcess,
        SpecialExitCode::CannotRedirectStandardOutput,
        SpecialExitCode::CannotRedirectStandardError,
        SpecialExitCode::CannotRedirectStandardInput,
        SpecialExitCode::TotalTimeout,
        SpecialExitCode::CpuLimit,
        SpecialExitCode::MemoryLimit,
        SpecialExitCode::HadChildren,
        SpecialExitCode::UnexpectedError,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|special| special.code() == code)
    }

    pub fn description(self) -> &'static str {
        match self {
            SpecialExitCode::WrongArgs => "wrong arguments",
            SpecialExitCode::CannotStartProcess => "cannot start process",
            SpecialExitCode::CannotRedirectStandardOutput => "cannot redirect standard output",
            SpecialExitCode::CannotRedirectStandardError => "cannot redirect standard error",
            SpecialExitCode::CannotRedirectStandardInput => "cannot redirect standard input",
            SpecialExitCode::TotalTimeout => "total timeout exceeded",
            SpecialExitCode::CpuLimit => "cpu limit exceeded",
            SpecialExitCode::MemoryLimit => "memory limit exceeded",
            SpecialExitCode::HadChildren => "child processes detected",
            SpecialExitCode::UnexpectedError => "unexpected error",
        }
    }
}

impl From<SpecialExitCode> for i32 {
    fn from(code: SpecialExitCode) -> Self {
        code.code()
    }
}

impl fmt::Display for SpecialExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Why a sandboxed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The sandbox decided the outcome
    Special(SpecialExitCode),
    /// The child's own (possibly translated) exit status
    Exited(i32),
}

impl TerminationCause {
    pub fn from_exit_code(code: i32) -> Self {
        match SpecialExitCode::from_code(code) {
            Some(special) => TerminationCause::Special(special),
            None => TerminationCause::Exited(code),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            TerminationCause::Special(special) => special.code(),
            TerminationCause::Exited(code) => *code,
        }
    }
}

/// Map a raw exit status to a semantic code where the kernel's backstop
/// limits explain it.
///
/// `152`/`158` are the child dying on `RLIMIT_CPU` (`SIGXCPU` soft limit, then
/// the hard-limit `SIGKILL` on some architectures); `137` is a `SIGKILL`
/// which on a supervised child means the OOM killer. Only positive values
/// are translated, and only where those signals carry that meaning.
pub fn translate_exit_code(raw: i32) -> i32 {
    if raw <= 0 || !cfg!(target_os = "linux") {
        return raw;
    }

    match raw {
        152 | 158 => SpecialExitCode::CpuLimit.code(),
        137 => SpecialExitCode::MemoryLimit.code(),
        _ => raw,
    }
}

/// Raw exit status, using the shell convention `128 + signal` for a
/// signal-terminated child
pub fn raw_exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
