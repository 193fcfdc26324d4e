//! Log-tailing monitor
//!
//! Reconstructs worker state from the log directory alone:
//! - `table`: redraws a per-slot table every refresh interval
//! - `tail`: interleaves new lines from the most recent logs
//!
//! Both views hold a single-instance lock for their lifetime and stop when
//! the shutdown flag is set.

pub mod lock;
pub mod snapshot;
pub mod table;
pub mod tail;

pub use lock::MonitorLock;
pub use snapshot::{
    collect_snapshots, discover_logs, IncrementalTally, LogFile, LogTally, WorkerSnapshot,
    WorkerState,
};
pub use tail::{TailLine, Tailer};

use crate::config::{MonitorConfig, TailConfig};
use crate::error::Result;
use console::{style, Term};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::info;

/// Granularity of the interruptible sleep
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Sleep in small steps; returns true once shutdown is requested
fn sleep_interruptible(duration: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::SeqCst) {
            return true;
        }
        let step = remaining.min(SHUTDOWN_POLL);
        std::thread::sleep(step);
        remaining -= step;
    }
    shutdown.load(Ordering::SeqCst)
}

/// Run the table view until interrupted (or once)
pub fn run_table(config: &MonitorConfig, shutdown: Arc<AtomicBool>) -> Result<()> {
    let _lock = MonitorLock::acquire(&config.lock_path)?;
    let term = Term::stdout();
    info!(dir = %config.log_dir.display(), slots = config.max_slots, "Monitor started");

    loop {
        let snapshots = collect_snapshots(&config.log_dir, config.max_slots, config.freshness)?;
        let rendered = table::render(&snapshots, config.max_slots, SystemTime::now());

        if !config.once {
            term.clear_screen()?;
        }
        println!(
            "{} {}  {}",
            style("drive-share monitor").cyan().bold(),
            style(config.log_dir.display()).dim(),
            style(chrono::Local::now().format("%H:%M:%S")).dim()
        );
        println!();
        print!("{}", rendered);

        if config.once || sleep_interruptible(config.refresh, &shutdown) {
            break;
        }
    }
    Ok(())
}

/// Run the live tail until interrupted
pub fn run_tail(config: &TailConfig, shutdown: Arc<AtomicBool>) -> Result<()> {
    let _lock = MonitorLock::acquire(&config.lock_path)?;
    let mut tailer = Tailer::new(&config.log_dir, config.max_files, config.max_read_bytes);
    info!(dir = %config.log_dir.display(), files = config.max_files, "Tail started");

    loop {
        for line in tailer.poll()? {
            println!("{}", line.render());
        }
        if sleep_interruptible(config.poll, &shutdown) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_interruptible() {
        let flag = AtomicBool::new(true);
        let start = std::time::Instant::now();
        assert!(sleep_interruptible(Duration::from_secs(10), &flag));
        assert!(start.elapsed() < Duration::from_secs(1));

        let flag = AtomicBool::new(false);
        assert!(!sleep_interruptible(Duration::from_millis(10), &flag));
    }
}
