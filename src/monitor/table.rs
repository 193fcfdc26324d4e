//! Fixed-width table of worker slots

use super::snapshot::{WorkerSnapshot, WorkerState};
use crate::progress::format_number;
use console::style;
use humansize::{format_size, BINARY};
use std::time::SystemTime;

const RULE_WIDTH: usize = 98;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn styled_state(state: WorkerState) -> String {
    let padded = format!("{:<10}", state.as_str());
    match state {
        WorkerState::Running => style(padded).green().bold().to_string(),
        WorkerState::Completed => style(padded).cyan().to_string(),
        WorkerState::Idle => style(padded).dim().to_string(),
    }
}

fn ago(then: SystemTime, now: SystemTime) -> String {
    match now.duration_since(then) {
        Ok(d) if d.as_secs() < 60 => format!("{}s ago", d.as_secs()),
        Ok(d) if d.as_secs() < 3600 => format!("{}m ago", d.as_secs() / 60),
        Ok(d) => format!("{}h ago", d.as_secs() / 3600),
        Err(_) => "now".to_string(),
    }
}

/// Render every slot `0..max_slots` plus a totals row
///
/// Slots without a snapshot are shown as idle and empty.
pub fn render(snapshots: &[WorkerSnapshot], max_slots: usize, now: SystemTime) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "{}\n",
        style(format!(
            "{:<5} {:<10} {:>9} {:>8} {:>8} {:>7}  {:<20} {:>9} {:>10}",
            "SLOT", "STATE", "PROGRESS", "GRANTED", "SKIPPED", "ERRORS", "CURRENT", "ACTIVE", "LOG SIZE"
        ))
        .bold()
    ));
    out.push_str(&format!("{}\n", style("─".repeat(RULE_WIDTH)).dim()));

    let (mut granted, mut skipped, mut errors, mut size) = (0u64, 0u64, 0u64, 0u64);
    let mut running = 0usize;

    for slot in 0..max_slots {
        match snapshots.iter().find(|s| s.slot == slot) {
            Some(s) => {
                granted += s.tally.granted;
                skipped += s.tally.skipped;
                errors += s.tally.errors;
                size += s.size;
                if s.state == WorkerState::Running {
                    running += 1;
                }
                out.push_str(&format!(
                    "{:<5} {} {:>9} {:>8} {:>8} {:>7}  {:<20} {:>9} {:>10}\n",
                    slot,
                    styled_state(s.state),
                    s.progress(),
                    format_number(s.tally.granted),
                    format_number(s.tally.skipped),
                    format_number(s.tally.errors),
                    truncate(s.tally.current.as_deref().unwrap_or("-"), 20),
                    ago(s.last_activity, now),
                    format_size(s.size, BINARY),
                ));
            }
            None => {
                out.push_str(&format!(
                    "{:<5} {} {:>9} {:>8} {:>8} {:>7}  {:<20} {:>9} {:>10}\n",
                    slot,
                    styled_state(WorkerState::Idle),
                    "-",
                    "0",
                    "0",
                    "0",
                    "-",
                    "-",
                    "-",
                ));
            }
        }
    }

    out.push_str(&format!("{}\n", style("─".repeat(RULE_WIDTH)).dim()));
    out.push_str(&format!(
        "{:<5} {:<10} {:>9} {:>8} {:>8} {:>7}  {:<20} {:>9} {:>10}\n",
        "ALL",
        format!("{} run", running),
        "",
        format_number(granted),
        format_number(skipped),
        format_number(errors),
        "",
        "",
        format_size(size, BINARY),
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::snapshot::LogTally;
    use std::path::PathBuf;
    use std::time::Duration;

    fn snapshot(slot: usize, state: WorkerState, granted: u64) -> WorkerSnapshot {
        WorkerSnapshot {
            slot,
            state,
            tally: LogTally {
                granted,
                skipped: 1,
                errors: 0,
                total: Some(10),
                processed: 6,
                current: Some("a-very-long-current-label-here".into()),
            },
            last_activity: SystemTime::UNIX_EPOCH,
            file: PathBuf::from("worker-0-1.log"),
            size: 2048,
        }
    }

    #[test]
    fn test_render_all_slots_and_totals() {
        console::set_colors_enabled(false);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        let text = render(
            &[snapshot(0, WorkerState::Running, 5), snapshot(2, WorkerState::Completed, 7)],
            4,
            now,
        );
        let lines: Vec<&str> = text.lines().collect();

        // header + rule + 4 slots + rule + totals
        assert_eq!(lines.len(), 8);
        assert!(lines[2].starts_with("0     RUNNING"));
        assert!(lines[2].contains("6/10"));
        assert!(lines[2].contains("5s ago"));
        assert!(lines[2].contains("2 KiB"));
        assert!(lines[2].contains("a-very-long-current…"));
        assert!(lines[3].starts_with("1     IDLE"));
        assert!(lines[4].contains("COMPLETED"));
        assert!(lines[7].starts_with("ALL   1 run"));
        assert!(lines[7].contains("12"));
        assert!(lines[7].contains("4 KiB"));
    }

    #[test]
    fn test_render_is_pure() {
        console::set_colors_enabled(false);
        let snaps = [snapshot(1, WorkerState::Running, 3)];
        let now = SystemTime::UNIX_EPOCH;
        assert_eq!(render(&snaps, 8, now), render(&snaps, 8, now));
    }
}
