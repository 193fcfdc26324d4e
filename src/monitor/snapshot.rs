//! Worker state reconstructed from log files
//!
//! A [`LogTally`] folds the worker log grammar into counters. It can be
//! built from the whole file on every poll ([`LogTally::from_text`]) or
//! kept up to date from an offset ([`IncrementalTally`]); both give the
//! same counters for the same bytes.

use crate::error::MonitorError;
use crate::worklog::{self, LogEvent};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Display state of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Completed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Running => "RUNNING",
            WorkerState::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters folded from log lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTally {
    /// Grants, including dry-run grants
    pub granted: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Size of the current cycle, from the latest marker
    pub total: Option<u64>,
    /// Outcomes since the latest marker
    pub processed: u64,
    /// Label of the latest outcome
    pub current: Option<String>,
}

impl LogTally {
    /// Parse a whole log
    pub fn from_text(text: &str) -> Self {
        let mut tally = Self::default();
        for line in text.lines() {
            tally.apply_line(line);
        }
        tally
    }

    /// Fold one line; lines outside the grammar are ignored
    pub fn apply_line(&mut self, line: &str) {
        let Some((_, _, message)) = worklog::split_line(line) else {
            return;
        };

        match LogEvent::parse(message) {
            LogEvent::Processing { count } => {
                self.total = Some(count as u64);
                self.processed = 0;
            }
            LogEvent::Granted { email, .. } | LogEvent::DryRun { email, .. } => {
                self.granted += 1;
                self.processed += 1;
                let local = email.split('@').next().unwrap_or_default();
                self.current = Some(local.to_string());
            }
            LogEvent::Skip { reason, .. } => {
                self.skipped += 1;
                self.processed += 1;
                self.current = Some(reason);
            }
            LogEvent::Error { name, .. } => {
                self.errors += 1;
                self.processed += 1;
                self.current = Some(name);
            }
            _ => {}
        }
    }

    /// Outcomes of any kind
    pub fn outcomes(&self) -> u64 {
        self.granted + self.skipped + self.errors
    }

    /// State given how long ago the log was last modified
    pub fn state(&self, age: Option<Duration>, freshness: Duration) -> WorkerState {
        if let Some(total) = self.total {
            return if self.processed < total {
                WorkerState::Running
            } else {
                WorkerState::Completed
            };
        }
        match age {
            Some(age) if age <= freshness => WorkerState::Running,
            _ if self.outcomes() > 0 => WorkerState::Completed,
            _ => WorkerState::Idle,
        }
    }
}

/// A [`LogTally`] fed only the bytes appended since the last update
#[derive(Debug, Default)]
pub struct IncrementalTally {
    tally: LogTally,
    offset: u64,
    partial: Vec<u8>,
}

impl IncrementalTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> &LogTally {
        &self.tally
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fold newly appended bytes; complete lines only
    pub fn feed(&mut self, bytes: &[u8]) {
        self.offset += bytes.len() as u64;
        self.partial.extend_from_slice(bytes);

        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in String::from_utf8_lossy(&complete).lines() {
            self.tally.apply_line(line);
        }
    }

    /// Read whatever was appended to `path` since the last update
    ///
    /// A file shorter than the current offset was truncated or replaced;
    /// the tally starts over.
    pub fn update(&mut self, path: &Path) -> io::Result<()> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            *self = Self::default();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf)?;
        self.feed(&buf);
        Ok(())
    }
}

/// A worker log file found in the log directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub slot: usize,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// Per-slot view rendered by the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub slot: usize,
    pub state: WorkerState,
    pub tally: LogTally,
    pub last_activity: SystemTime,
    pub file: PathBuf,
    pub size: u64,
}

impl WorkerSnapshot {
    /// "processed/total" for the current cycle
    pub fn progress(&self) -> String {
        match self.tally.total {
            Some(total) => format!("{}/{}", self.tally.processed, total),
            None => "-".to_string(),
        }
    }
}

/// `*.log` worker files, newest per slot, for slots below `max_slots`
///
/// A missing directory yields no files.
pub fn discover_logs(dir: &Path, max_slots: usize) -> Result<Vec<LogFile>, MonitorError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(MonitorError::LogDir {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let mut files: Vec<LogFile> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let slot = worklog::slot_from_file_name(&name)?;
            let meta = entry.metadata().ok()?;
            if !meta.is_file() || slot >= max_slots {
                return None;
            }
            Some(LogFile {
                slot,
                path: entry.path(),
                modified: meta.modified().ok()?,
                size: meta.len(),
            })
        })
        .collect();

    // Newest first, name as tie-break (stamps sort chronologically)
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));

    let mut seen = vec![false; max_slots];
    files.retain(|f| !std::mem::replace(&mut seen[f.slot], true));
    files.sort_by_key(|f| f.slot);
    Ok(files)
}

/// Snapshot one file by parsing it in full
pub fn snapshot_file(log: &LogFile, freshness: Duration, now: SystemTime) -> io::Result<WorkerSnapshot> {
    let bytes = std::fs::read(&log.path)?;
    let tally = LogTally::from_text(&String::from_utf8_lossy(&bytes));
    let age = now.duration_since(log.modified).ok();

    Ok(WorkerSnapshot {
        slot: log.slot,
        state: tally.state(age.or(Some(Duration::ZERO)), freshness),
        tally,
        last_activity: log.modified,
        file: log.path.clone(),
        size: bytes.len() as u64,
    })
}

/// Snapshots of every tracked slot
pub fn collect_snapshots(
    dir: &Path,
    max_slots: usize,
    freshness: Duration,
) -> Result<Vec<WorkerSnapshot>, MonitorError> {
    let now = SystemTime::now();
    let mut snapshots = Vec::new();
    for log in discover_logs(dir, max_slots)? {
        match snapshot_file(&log, freshness, now) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => tracing::debug!(path = %log.path.display(), error = %e, "Skipping unreadable log"),
        }
    }
    Ok(snapshots)
}
