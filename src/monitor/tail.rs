//! Multiplexed live tail of the most recent worker logs
//!
//! Each followed file keeps a byte offset. A poll reads only what was
//! appended since (capped per file), emits complete lines and keeps the
//! trailing partial line for the next poll.
//!
//! Files present at the first poll start at their end; files that appear
//! later are read from the start, so a new worker's first lines show up.

use crate::error::MonitorError;
use crate::worklog;
use console::Style;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Label colors, assigned in order of first sight
const PALETTE: [fn(Style) -> Style; 6] = [
    Style::cyan,
    Style::green,
    Style::yellow,
    Style::magenta,
    Style::blue,
    Style::red,
];

/// A line read from a followed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub label: String,
    pub color: usize,
    pub text: String,
}

impl TailLine {
    /// Prefixed, colored line for the terminal
    pub fn render(&self) -> String {
        let style = PALETTE[self.color % PALETTE.len()](Style::new()).bold();
        format!("{} {}", style.apply_to(format!("[{:<4}]", self.label)), self.text)
    }
}

#[derive(Debug)]
struct FollowedFile {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    label: String,
    color: usize,
}

/// Label, color and resume offset of a log seen at least once
#[derive(Debug, Clone)]
struct KnownFile {
    label: String,
    color: usize,
    offset: u64,
}

/// Follows the `max_files` most recently modified logs
pub struct Tailer {
    dir: PathBuf,
    max_files: usize,
    max_read_bytes: usize,
    followed: Vec<FollowedFile>,
    /// Entries survive a file leaving and re-entering the followed set;
    /// pruned once the file is gone from the directory
    known: HashMap<PathBuf, KnownFile>,
    next_color: usize,
    primed: bool,
}

/// Short label for a log file: `w<slot>` or the file stem
fn label_for(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match worklog::slot_from_file_name(&name) {
        Some(slot) => format!("w{}", slot),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(name),
    }
}

impl Tailer {
    pub fn new(dir: &Path, max_files: usize, max_read_bytes: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_files,
            max_read_bytes: max_read_bytes.max(1),
            followed: Vec::new(),
            known: HashMap::new(),
            next_color: 0,
            primed: false,
        }
    }

    /// Paths currently followed, in insertion order
    pub fn followed(&self) -> Vec<&Path> {
        self.followed.iter().map(|f| f.path.as_path()).collect()
    }

    /// Number of remembered files (followed or not)
    pub fn known_files(&self) -> usize {
        self.known.len()
    }

    /// Every `*.log` file, most recently modified first
    fn scan_logs(&self) -> Result<Vec<PathBuf>, MonitorError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MonitorError::LogDir {
                    path: self.dir.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let mut logs: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == worklog::LOG_EXTENSION)
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                meta.is_file()
                    .then(|| meta.modified().ok().map(|m| (m, entry.path())))
                    .flatten()
            })
            .collect();

        logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(logs.into_iter().map(|(_, path)| path).collect())
    }

    /// Refresh the followed set
    fn refresh(&mut self) -> Result<(), MonitorError> {
        let mut logs = self.scan_logs()?;
        self.known.retain(|path, _| logs.contains(path));
        if !self.primed {
            // Everything already on disk is history; start at its end
            for path in &logs {
                let offset = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                self.remember(path, offset);
            }
            self.primed = true;
        }
        logs.truncate(self.max_files);

        // Step 1: drop files leaving the set, remembering where they were
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.followed)
            .into_iter()
            .partition(|f| logs.contains(&f.path));
        for file in dropped {
            if let Some(known) = self.known.get_mut(&file.path) {
                known.offset = file.offset;
            }
        }
        self.followed = kept;

        // Step 2: follow newcomers
        for path in logs {
            if self.followed.iter().any(|f| f.path == path) {
                continue;
            }
            let known = self.remember(&path, 0).clone();
            self.followed.push(FollowedFile {
                path,
                offset: known.offset,
                partial: Vec::new(),
                label: known.label,
                color: known.color,
            });
        }
        Ok(())
    }

    /// Entry for `path`, created at `offset` with the next color if unseen
    fn remember(&mut self, path: &Path, offset: u64) -> &KnownFile {
        let next_color = &mut self.next_color;
        self.known.entry(path.to_path_buf()).or_insert_with(|| {
            let color = *next_color;
            *next_color += 1;
            KnownFile {
                label: label_for(path),
                color,
                offset,
            }
        })
    }

    /// One poll: complete new lines from every followed file
    pub fn poll(&mut self) -> Result<Vec<TailLine>, MonitorError> {
        self.refresh()?;

        let mut lines = Vec::new();
        for file in &mut self.followed {
            match read_new(file, self.max_read_bytes) {
                Ok(texts) => lines.extend(texts.into_iter().map(|text| TailLine {
                    label: file.label.clone(),
                    color: file.color,
                    text,
                })),
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "Tail read failed")
                }
            }
        }
        Ok(lines)
    }
}

/// Read up to `cap` new bytes and split off complete lines
fn read_new(file: &mut FollowedFile, cap: usize) -> io::Result<Vec<String>> {
    let mut handle = File::open(&file.path)?;
    let len = handle.metadata()?.len();

    if len < file.offset {
        file.offset = 0;
        file.partial.clear();
    }
    if len == file.offset {
        return Ok(Vec::new());
    }

    let want = (len - file.offset).min(cap as u64);
    handle.seek(SeekFrom::Start(file.offset))?;
    let mut buf = Vec::with_capacity(want as usize);
    handle.take(want).read_to_end(&mut buf)?;
    file.offset += buf.len() as u64;
    file.partial.extend_from_slice(&buf);

    let mut lines = Vec::new();
    if let Some(last_newline) = file.partial.iter().rposition(|&b| b == b'\n') {
        let rest = file.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut file.partial, rest);
        lines.extend(
            String::from_utf8_lossy(&complete)
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string()),
        );
    } else if file.partial.len() >= cap {
        // A single line longer than the cap is emitted in pieces
        lines.push(String::from_utf8_lossy(&file.partial).to_string());
        file.partial.clear();
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_later_files_are_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        append(&dir.path().join("worker-1-1.log"), "existing\n");

        let mut tailer = Tailer::new(dir.path(), 4, 1024);
        assert!(tailer.poll().unwrap().is_empty());

        let fresh = dir.path().join("worker-0-1.log");
        append(&fresh, "[t] [INFO] Session start: worker 0/2\n");
        append(&fresh, "[t] [INFO] Processing 3 participants\n");

        let lines = tailer.poll().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.label == "w0"));
        assert!(lines[1].text.ends_with("Processing 3 participants"));
    }

    #[test]
    fn test_dropped_file_resumes_and_deleted_file_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("worker-0-1.log");
        let b = dir.path().join("worker-1-1.log");
        append(&a, "a0\n");

        let mut tailer = Tailer::new(dir.path(), 1, 1024);
        tailer.poll().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        // b becomes the most recent; a is dropped at its offset
        append(&b, "b1\n");
        let lines = tailer.poll().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "b1");
        let color_a = tailer.known[&a].color;
        std::thread::sleep(std::time::Duration::from_millis(20));

        // a comes back: only what was appended since it was dropped
        append(&a, "a1\n");
        let lines = tailer.poll().unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a1"]);
        assert_eq!(lines[0].color, color_a);
        assert_eq!(tailer.known_files(), 2);

        std::fs::remove_file(&b).unwrap();
        tailer.poll().unwrap();
        assert_eq!(tailer.known_files(), 1);
    }

    #[test]
    fn test_new_files_start_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker-0-1.log");
        append(&path, "old line\n");

        let mut tailer = Tailer::new(dir.path(), 4, 1024);
        assert!(tailer.poll().unwrap().is_empty());

        append(&path, "new line\npartial");
        let lines = tailer.poll().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "new line");
        assert_eq!(lines[0].label, "w0");

        append(&path, " done\n");
        assert_eq!(tailer.poll().unwrap()[0].text, "partial done");
    }

    #[test]
    fn test_read_cap_and_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker-1-1.log");
        append(&path, "");

        let mut tailer = Tailer::new(dir.path(), 4, 8);
        tailer.poll().unwrap();

        append(&path, "aaa\nbbb\nccc\n");
        let first: Vec<String> = tailer.poll().unwrap().into_iter().map(|l| l.text).collect();
        assert_eq!(first, vec!["aaa", "bbb"]);
        let second: Vec<String> = tailer.poll().unwrap().into_iter().map(|l| l.text).collect();
        assert_eq!(second, vec!["ccc"]);

        std::fs::write(&path, "x\n").unwrap();
        let after: Vec<String> = tailer.poll().unwrap().into_iter().map(|l| l.text).collect();
        assert_eq!(after, vec!["x"]);
    }

    #[test]
    fn test_stable_colors_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("worker-0-1.log");
        let b = dir.path().join("worker-1-1.log");
        append(&a, "");
        append(&b, "");

        let mut tailer = Tailer::new(dir.path(), 4, 1024);
        tailer.poll().unwrap();
        append(&a, "from a\n");
        append(&b, "from b\n");

        let lines = tailer.poll().unwrap();
        let color_a = lines.iter().find(|l| l.label == "w0").unwrap().color;
        let color_b = lines.iter().find(|l| l.label == "w1").unwrap().color;
        assert_ne!(color_a, color_b);

        append(&a, "again\n");
        let again = tailer.poll().unwrap();
        assert_eq!(again[0].color, color_a);
        console::set_colors_enabled(false);
        assert_eq!(again[0].render(), "[w0  ] again");
    }

    #[test]
    fn test_only_most_recent_files_followed() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            append(&dir.path().join(format!("worker-{}-1.log", i)), "");
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored\n").unwrap();

        let mut tailer = Tailer::new(dir.path(), 2, 1024);
        tailer.poll().unwrap();
        let followed = tailer.followed();
        assert_eq!(followed.len(), 2);
        assert!(!followed.iter().any(|p| p.ends_with("worker-0-1.log")));
    }

    #[test]
    fn test_unfollowed_file_from_first_poll_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("worker-0-1.log");
        append(&old, "history\n");
        std::thread::sleep(std::time::Duration::from_millis(20));
        append(&dir.path().join("worker-1-1.log"), "");

        let mut tailer = Tailer::new(dir.path(), 1, 1024);
        tailer.poll().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        append(&old, "fresh\n");
        let texts: Vec<String> = tailer.poll().unwrap().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["fresh"]);
    }
}
