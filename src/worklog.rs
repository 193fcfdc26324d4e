//! Worker log files
//!
//! Each worker appends to its own `worker-<slot>-<stamp>.log` in the log
//! directory. The line grammar is fixed because the monitor reconstructs
//! worker state from it:
//!
//! ```text
//! [2026-01-05T10:00:00.123Z] [INFO] Session start: worker 0/4 session=<uuid> dry_run=false
//! [2026-01-05T10:00:00.456Z] [INFO] Processing 12 participants
//! [2026-01-05T10:00:03.001Z] [INFO] GRANTED row=5 email=jane@gmail.com folder=1AbC elapsed_ms=2480
//! [2026-01-05T10:00:05.600Z] [INFO] DRY_RUN row=6 email=joe@gmail.com folder=1XyZ elapsed_ms=2500
//! [2026-01-05T10:00:05.700Z] [WARN] SKIP row=7 reason=duplicate name="Joe Bloggs" elapsed_ms=0
//! [2026-01-05T10:00:08.200Z] [ERROR] ERROR row=8 name="Ann Lee" reason="folder not found" elapsed_ms=2499
//! [2026-01-05T10:00:08.300Z] [INFO] Cycle summary: granted=1 dry_run=1 skipped=1 errors=1 elapsed_ms=7844
//! ```

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};
use uuid::Uuid;

static LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\] \[([A-Z]+)\] (.*)$").expect("Invalid log line regex")
});

static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Processing (\d+) participants$").expect("Invalid marker regex")
});

static GRANT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(GRANTED|DRY_RUN) row=(\d+) email=(\S+) folder=(\S+) elapsed_ms=(\d+)$")
        .expect("Invalid grant regex")
});

static SKIP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^SKIP row=(\d+) reason=(\S+) name="([^"]*)" elapsed_ms=(\d+)$"#)
        .expect("Invalid skip regex")
});

static ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^ERROR row=(\d+) name="([^"]*)" reason="([^"]*)" elapsed_ms=(\d+)$"#)
        .expect("Invalid error regex")
});

/// Log file name prefix
pub const LOG_PREFIX: &str = "worker-";

/// Log file extension
pub const LOG_EXTENSION: &str = "log";

/// Severity column of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Quoted fields cannot contain `"`
fn quote_safe(text: &str) -> String {
    text.replace('"', "'").replace(['\n', '\r'], " ")
}

/// One message of the worker log grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    SessionStart {
        index: usize,
        total: usize,
        session: Uuid,
        dry_run: bool,
    },
    Processing {
        count: usize,
    },
    Granted {
        row: usize,
        email: String,
        folder: String,
        elapsed_ms: u64,
    },
    DryRun {
        row: usize,
        email: String,
        folder: String,
        elapsed_ms: u64,
    },
    Skip {
        row: usize,
        reason: String,
        name: String,
        elapsed_ms: u64,
    },
    Error {
        row: usize,
        name: String,
        reason: String,
        elapsed_ms: u64,
    },
    CycleSummary {
        granted: u64,
        dry_run: u64,
        skipped: u64,
        errors: u64,
        elapsed_ms: u64,
    },
    /// Free text, ignored by the monitor
    Note(String),
}

impl LogEvent {
    pub fn level(&self) -> Level {
        match self {
            LogEvent::Skip { .. } => Level::Warn,
            LogEvent::Error { .. } => Level::Error,
            _ => Level::Info,
        }
    }

    /// Parse the message part of a log line
    ///
    /// Unrecognised messages come back as [`LogEvent::Note`].
    pub fn parse(message: &str) -> LogEvent {
        let num = |s: &str| s.parse::<u64>().unwrap_or(0);

        if let Some(c) = MARKER_REGEX.captures(message) {
            return LogEvent::Processing {
                count: c[1].parse().unwrap_or(0),
            };
        }
        if let Some(c) = GRANT_REGEX.captures(message) {
            let row = c[2].parse().unwrap_or(0);
            let email = c[3].to_string();
            let folder = c[4].to_string();
            let elapsed_ms = num(&c[5]);
            return if &c[1] == "GRANTED" {
                LogEvent::Granted { row, email, folder, elapsed_ms }
            } else {
                LogEvent::DryRun { row, email, folder, elapsed_ms }
            };
        }
        if let Some(c) = SKIP_REGEX.captures(message) {
            return LogEvent::Skip {
                row: c[1].parse().unwrap_or(0),
                reason: c[2].to_string(),
                name: c[3].to_string(),
                elapsed_ms: num(&c[4]),
            };
        }
        if let Some(c) = ERROR_REGEX.captures(message) {
            return LogEvent::Error {
                row: c[1].parse().unwrap_or(0),
                name: c[2].to_string(),
                reason: c[3].to_string(),
                elapsed_ms: num(&c[4]),
            };
        }
        LogEvent::Note(message.to_string())
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEvent::SessionStart { index, total, session, dry_run } => write!(
                f,
                "Session start: worker {}/{} session={} dry_run={}",
                index, total, session, dry_run
            ),
            LogEvent::Processing { count } => write!(f, "Processing {} participants", count),
            LogEvent::Granted { row, email, folder, elapsed_ms } => write!(
                f,
                "GRANTED row={} email={} folder={} elapsed_ms={}",
                row, email, folder, elapsed_ms
            ),
            LogEvent::DryRun { row, email, folder, elapsed_ms } => write!(
                f,
                "DRY_RUN row={} email={} folder={} elapsed_ms={}",
                row, email, folder, elapsed_ms
            ),
            LogEvent::Skip { row, reason, name, elapsed_ms } => write!(
                f,
                "SKIP row={} reason={} name=\"{}\" elapsed_ms={}",
                row,
                reason,
                quote_safe(name),
                elapsed_ms
            ),
            LogEvent::Error { row, name, reason, elapsed_ms } => write!(
                f,
                "ERROR row={} name=\"{}\" reason=\"{}\" elapsed_ms={}",
                row,
                quote_safe(name),
                quote_safe(reason),
                elapsed_ms
            ),
            LogEvent::CycleSummary { granted, dry_run, skipped, errors, elapsed_ms } => write!(
                f,
                "Cycle summary: granted={} dry_run={} skipped={} errors={} elapsed_ms={}",
                granted, dry_run, skipped, errors, elapsed_ms
            ),
            LogEvent::Note(text) => f.write_str(text),
        }
    }
}

/// Split a full log line into (timestamp, level, message)
pub fn split_line(line: &str) -> Option<(&str, &str, &str)> {
    let c = LINE_REGEX.captures(line.trim_end_matches(['\r', '\n']))?;
    Some((
        c.get(1)?.as_str(),
        c.get(2)?.as_str(),
        c.get(3)?.as_str(),
    ))
}

/// Format a complete line with the current time
pub fn format_line(event: &LogEvent) -> String {
    format!(
        "[{}] [{}] {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        event.level().as_str(),
        event
    )
}

/// Log file name for a worker slot
pub fn log_file_name(slot: usize, stamp: &str) -> String {
    format!("{}{}-{}.{}", LOG_PREFIX, slot, stamp, LOG_EXTENSION)
}

/// Slot number encoded in a log file name
pub fn slot_from_file_name(name: &str) -> Option<usize> {
    let rest = name.strip_prefix(LOG_PREFIX)?;
    let rest = rest.strip_suffix(&format!(".{}", LOG_EXTENSION))?;
    let (slot, stamp) = rest.split_once('-')?;
    if stamp.is_empty() {
        return None;
    }
    slot.parse().ok()
}

/// Append-only log for one worker session
pub struct WorkLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WorkLog {
    /// Create a new log file for `slot` in `dir`
    pub fn create(dir: &Path, slot: usize) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let path = dir.join(log_file_name(slot, &stamp));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line
    pub fn record(&self, event: &LogEvent) -> io::Result<()> {
        let mut line = format_line(event);
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}
