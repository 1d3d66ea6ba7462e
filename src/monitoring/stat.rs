//! `/proc/<pid>/stat` record parsing
//!
//! Only the leading identity fields are interpreted:
//! `pid (comm) state ppid pgrp session ...`. The parser never fails; a
//! truncated or malformed line yields the fields read so far and defaults
//! for the rest.
//!
//! The command name runs from the first `(` to the first `)` after it, so a
//! name that itself contains `)` is cut short. Callers that need the fields
//! after the name should locate the *last* `)` instead (see
//! [`crate::monitoring::usage`]).

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Initial read buffer; grows when a stat line is longer
const STAT_BUFFER_SIZE: usize = 4096;

/// Identity snapshot of one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatRecord {
    /// Process ID
    pub pid: i32,
    /// Executable name without the parentheses
    pub comm: Option<String>,
    /// Single-letter state, `'\0'` when absent
    pub state: char,
    /// Parent process ID
    pub ppid: i32,
    /// Process group ID
    pub pgrp: i32,
    /// Session ID
    pub session: i32,
}

impl StatRecord {
    /// Parse a single stat line
    pub fn parse(line: &str) -> Self {
        let mut record = StatRecord::default();
        let mut cursor = Cursor::new(line);
        let _ = fill_record(&mut record, &mut cursor);
        record
    }

    /// Read and parse `<proc_root>/<pid>/stat`, `None` if the process is gone
    pub fn read(proc_root: &Path, pid: i32) -> Option<Self> {
        let contents = read_stat_file(&proc_root.join(pid.to_string()).join("stat"))?;
        Some(Self::parse(&contents))
    }
}

fn fill_record(record: &mut StatRecord, cursor: &mut Cursor<'_>) -> Option<()> {
    record.pid = cursor.next_i32()?;
    record.comm = Some(cursor.next_parenthesized()?.to_string());
    record.state = cursor.next_char()?;
    record.ppid = cursor.next_i32()?;
    record.pgrp = cursor.next_i32()?;
    record.session = cursor.next_i32()?;
    Some(())
}

/// Read a whole procfs file.
///
/// procfs reports a size of zero, so the buffer is grown as the read
/// proceeds instead of being sized up front.
pub fn read_stat_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut buffer = Vec::with_capacity(STAT_BUFFER_SIZE);
    file.read_to_end(&mut buffer).ok()?;
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

struct Cursor<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, offset: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.offset..]
    }

    /// Whitespace-delimited term; `None` when empty
    fn next_term(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        self.offset += len;
        self.skip_delimiter();
        let term = &rest[..len];
        (!term.is_empty()).then_some(term)
    }

    /// Term enclosed in parentheses, up to the first `)`
    fn next_parenthesized(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        if rest.len() < 2 || !rest.starts_with('(') {
            return None;
        }

        let body = &rest[1..];
        let len = body.find(')').unwrap_or(body.len());
        self.offset += 1 + len;
        self.skip_delimiter();
        let term = &body[..len];
        (!term.is_empty()).then_some(term)
    }

    fn next_i32(&mut self) -> Option<i32> {
        self.next_term()?.parse().ok()
    }

    fn next_char(&mut self) -> Option<char> {
        let mut chars = self.next_term()?.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }

    /// Step over the delimiter that ended the previous term, plus one
    /// separating whitespace character.
    fn skip_delimiter(&mut self) {
        if let Some(delimiter) = self.rest().chars().next() {
            self.offset += delimiter.len_utf8();
            if let Some(next) = self.rest().chars().next() {
                if next.is_whitespace() {
                    self.offset += next.len_utf8();
                }
            }
        }
    }
}
