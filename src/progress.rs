//! Console output for the worker
//!
//! A spinner shows the record being processed; each outcome is printed
//! above it as one styled line, and every cycle ends with a summary block.

use crate::config::WorkerConfig;
use crate::processor::{CycleStats, Outcome, RecordReport};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner plus outcome lines
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos}/{len} {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Start a cycle of `total` records
    pub fn start_cycle(&self, total: usize) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Print one outcome above the spinner
    pub fn outcome(&self, report: &RecordReport) {
        self.bar.println(format_outcome(report));
        self.bar.inc(1);
    }

    /// Print a cycle summary above the spinner
    pub fn summary(&self, stats: &CycleStats) {
        for line in summary_lines(stats) {
            self.bar.println(line);
        }
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// One styled console line for an outcome
pub fn format_outcome(report: &RecordReport) -> String {
    let row = style(format!("row {:>5}", report.row + 1)).dim();
    let elapsed = style(format!("({:.1}s)", report.elapsed.as_secs_f64())).dim();
    let folder = report.folder.as_ref().map(|f| f.id.as_str()).unwrap_or("-");

    match &report.outcome {
        Outcome::Granted => format!(
            "{} {} {} {} {} {}",
            style("✔ GRANTED ").green().bold(),
            row,
            report.name.trim(),
            style(report.email.trim()).cyan(),
            style(folder).dim(),
            elapsed
        ),
        Outcome::DryRun => format!(
            "{} {} {} {} {} {}",
            style("◌ DRY RUN ").blue().bold(),
            row,
            report.name.trim(),
            style(report.email.trim()).cyan(),
            style(folder).dim(),
            elapsed
        ),
        Outcome::Skipped(reason) => format!(
            "{} {} {} {} {}",
            style("↷ SKIPPED ").yellow().bold(),
            row,
            report.name.trim(),
            style(reason.detail()).yellow(),
            elapsed
        ),
        Outcome::NotFound | Outcome::GrantFailed(_) => format!(
            "{} {} {} {} {}",
            style("✘ ERROR   ").red().bold(),
            row,
            report.name.trim(),
            style(report.outcome.detail()).red(),
            elapsed
        ),
    }
}

fn summary_lines(stats: &CycleStats) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!("{}", style("Cycle Complete").green().bold()),
        format!("{}", style("─".repeat(50)).dim()),
        format!("  {} {}", style("Processed:").bold(), format_number(stats.processed)),
        format!("  {} {}", style("Granted:").bold(), format_number(stats.granted)),
    ];
    if stats.dry_run > 0 {
        lines.push(format!("  {} {}", style("Dry run:").bold(), format_number(stats.dry_run)));
    }
    lines.push(format!("  {} {}", style("Skipped:").bold(), format_number(stats.skipped)));
    if stats.errors > 0 {
        lines.push(format!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(stats.errors)
        ));
    }
    if stats.write_failures > 0 {
        lines.push(format!(
            "  {} {}",
            style("Sheet write failures:").yellow().bold(),
            format_number(stats.write_failures)
        ));
    }
    lines.push(format!(
        "  {} {} eligible, {} owned by other workers",
        style("Records:").bold(),
        format_number(stats.eligible),
        format_number(stats.not_owned)
    ));
    lines.push(format!(
        "  {} {:.1}s",
        style("Duration:").bold(),
        stats.elapsed.as_secs_f64()
    ));
    lines.push(String::new());
    lines
}

/// Print a cycle summary without a spinner
pub fn print_summary(stats: &CycleStats) {
    for line in summary_lines(stats) {
        println!("{}", line);
    }
}

/// Print a header at the start of a worker session
pub fn print_header(config: &WorkerConfig, log_path: &str) {
    println!();
    println!(
        "{} {}",
        style("drive-share").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} / {}",
        style("Sheet:").bold(),
        config.spreadsheet_id,
        config.sheet_name
    );
    if config.shard.is_enabled() {
        println!(
            "  {} {}/{}",
            style("Shard:").bold(),
            config.shard.index,
            config.shard.total
        );
    }
    if let Some(root) = &config.root_folder_id {
        println!("  {} {}", style("Scope:").bold(), root);
    }
    println!("  {} {}", style("Role:").bold(), config.role);
    println!("  {} {}", style("Log:").bold(), log_path);
    if config.dry_run {
        println!("  {}", style("DRY RUN: no permissions will be created").yellow().bold());
    }
    println!();
}
