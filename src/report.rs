//! Run statistics and result-file formats

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SandboxError};

/// Snapshot of a sandboxed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatistics {
    /// Settled exit code, `None` while the child is still supervised
    pub exit_code: Option<i32>,
    /// Wall-clock time since launch in milliseconds
    pub elapsed_ms: u64,
    /// CPU time in milliseconds
    pub cpu_time_ms: u64,
    /// Peak memory in bytes
    pub memory_bytes: u64,
    /// Characters delivered to the stdout sink
    pub stdout_length: u64,
    pub stdout_limit_exceeded: bool,
    /// Characters delivered to the stderr sink
    pub stderr_length: u64,
    pub stderr_limit_exceeded: bool,
    /// The child exited before any limit fired
    pub self_completion: bool,
    /// Descendant processes were detected
    pub had_children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Result file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// One value per line, booleans as `1`/`0`
    #[default]
    Lines,
    /// Pretty-printed JSON object
    Json,
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl SandboxStatistics {
    /// Write the ten-line format: exit code, elapsed ms, CPU ms, memory,
    /// stdout length, stdout exceeded, stderr length, stderr exceeded,
    /// self completion, had children. An unsettled exit code is `-1`.
    pub fn write_lines<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let flag = |value: bool| if value { 1 } else { 0 };

        writeln!(out, "{}", self.exit_code.unwrap_or(-1))?;
        writeln!(out, "{}", self.elapsed_ms)?;
        writeln!(out, "{}", self.cpu_time_ms)?;
        writeln!(out, "{}", self.memory_bytes)?;
        writeln!(out, "{}", self.stdout_length)?;
        writeln!(out, "{}", flag(self.stdout_limit_exceeded))?;
        writeln!(out, "{}", self.stderr_length)?;
        writeln!(out, "{}", flag(self.stderr_limit_exceeded))?;
        writeln!(out, "{}", flag(self.self_completion))?;
        writeln!(out, "{}", flag(self.had_children))?;
        Ok(())
    }

    pub fn write_json<W: Write>(&self, out: &mut W) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)
            .map_err(|e| SandboxError::Io(io::Error::other(e)))?;
        writeln!(out)?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, out: &mut W, format: ReportFormat) -> Result<()> {
        match format {
            ReportFormat::Lines => Ok(self.write_lines(out)?),
            ReportFormat::Json => self.write_json(out),
        }
    }

    /// Create or truncate `path` and write the statistics into it
    pub fn save(&self, path: &Path, format: ReportFormat) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out, format)?;
        out.flush()?;
        Ok(())
    }
}
