//! Batch processor and per-record state machine
//!
//! One cycle:
//! 1. Read the sheet and detect columns
//! 2. Drop records whose status is already set (tri-state gate)
//! 3. Keep records owned by this worker's shard
//! 4. Prioritize and cap at `max_per_run`
//! 5. Drive each record through
//!    validate → resolve → permission check → grant
//! 6. Persist status, `LastLog`, folder columns and the worker log line
//!
//! Per-record failures are outcomes, never errors. Only setup failures
//! (missing columns, unreadable sheet) stop a run.

use crate::config::WorkerConfig;
use crate::drive::{PermissionRequest, ResourceStore};
use crate::error::{Result, SheetError};
use crate::progress::ProgressReporter;
use crate::resolver::{ResolutionCache, ResolutionSource, Resolver};
use crate::retry::{Executor, RetryPolicy};
use crate::sheet::{Column, ColumnMap, Record, SheetClient, TabularStore};
use crate::worklog::{LogEvent, WorkLog};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex"));

/// Granularity of the interruptible inter-cycle sleep
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Why a record was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Blank name/email, malformed email or domain not allowed
    InvalidFormat(String),
    /// Same (name, email) already seen this cycle
    Duplicate,
    /// Recipient already holds the role or better
    AlreadyGranted,
}

impl SkipReason {
    /// Token used in the worker log
    pub fn token(&self) -> &'static str {
        match self {
            SkipReason::InvalidFormat(_) => "invalid-format",
            SkipReason::Duplicate => "duplicate",
            SkipReason::AlreadyGranted => "already-granted",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            SkipReason::InvalidFormat(detail) => format!("invalid format: {}", detail),
            SkipReason::Duplicate => "duplicate of an earlier row".to_string(),
            SkipReason::AlreadyGranted => "already has access".to_string(),
        }
    }
}

/// Terminal state of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Granted,
    DryRun,
    Skipped(SkipReason),
    NotFound,
    GrantFailed(String),
}

impl Outcome {
    /// Label used in `LastLog`
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Granted => "GRANTED",
            Outcome::DryRun => "DRY_RUN",
            Outcome::Skipped(_) => "SKIPPED",
            Outcome::NotFound | Outcome::GrantFailed(_) => "ERROR",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Outcome::Granted => "permission created".to_string(),
            Outcome::DryRun => "permission not created (dry run)".to_string(),
            Outcome::Skipped(reason) => reason.detail(),
            Outcome::NotFound => "folder not found".to_string(),
            Outcome::GrantFailed(reason) => reason.clone(),
        }
    }

    /// Value persisted in the status column
    ///
    /// `None` leaves the cell untouched so the record stays eligible.
    pub fn status_value(&self) -> Option<&'static str> {
        match self {
            Outcome::Granted | Outcome::Skipped(SkipReason::AlreadyGranted) => Some("true"),
            Outcome::DryRun => None,
            Outcome::Skipped(_) | Outcome::NotFound | Outcome::GrantFailed(_) => Some("false"),
        }
    }
}

/// Where a record's folder id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderOrigin {
    /// `FolderId` column
    Sheet,
    Resolved(ResolutionSource),
}

/// Target folder of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub origin: FolderOrigin,
}

/// Result of processing one record
#[derive(Debug, Clone)]
pub struct RecordReport {
    /// Grid row (header = 0)
    pub row: usize,
    pub name: String,
    pub email: String,
    pub outcome: Outcome,
    pub folder: Option<FolderRef>,
    pub elapsed: Duration,
}

impl RecordReport {
    fn new(record: &Record, outcome: Outcome, folder: Option<FolderRef>, start: Instant) -> Self {
        Self {
            row: record.row,
            name: record.name.trim().to_string(),
            email: record.email.trim().to_string(),
            outcome,
            folder,
            elapsed: start.elapsed(),
        }
    }

    /// Worker log line for this report (rows are 1-based like the sheet)
    pub fn log_event(&self) -> LogEvent {
        let row = self.row + 1;
        let elapsed_ms = self.elapsed.as_millis() as u64;
        let folder = self
            .folder
            .as_ref()
            .map(|f| f.id.clone())
            .unwrap_or_else(|| "-".to_string());
        match &self.outcome {
            Outcome::Granted => LogEvent::Granted {
                row,
                email: self.email.clone(),
                folder,
                elapsed_ms,
            },
            Outcome::DryRun => LogEvent::DryRun {
                row,
                email: self.email.clone(),
                folder,
                elapsed_ms,
            },
            Outcome::Skipped(reason) => LogEvent::Skip {
                row,
                reason: reason.token().to_string(),
                name: self.name.clone(),
                elapsed_ms,
            },
            Outcome::NotFound | Outcome::GrantFailed(_) => LogEvent::Error {
                row,
                name: self.name.clone(),
                reason: self.outcome.detail(),
                elapsed_ms,
            },
        }
    }

    /// `LastLog` cell content
    pub fn last_log(&self, now: &str) -> String {
        match &self.folder {
            Some(folder) => format!(
                "[{}] {}: {} (folder {})",
                now,
                self.outcome.label(),
                self.outcome.detail(),
                folder.id
            ),
            None => format!("[{}] {}: {}", now, self.outcome.label(), self.outcome.detail()),
        }
    }
}

/// Counters for one cycle (or a whole run)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Records with an empty status
    pub eligible: u64,
    /// Eligible records owned by other shards
    pub not_owned: u64,
    /// Records driven through the state machine
    pub processed: u64,
    pub granted: u64,
    pub dry_run: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Sheet writes that failed after retries
    pub write_failures: u64,
    pub elapsed: Duration,
}

impl CycleStats {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Granted => self.granted += 1,
            Outcome::DryRun => self.dry_run += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::NotFound | Outcome::GrantFailed(_) => self.errors += 1,
        }
    }

    /// Add another cycle's counters
    pub fn absorb(&mut self, other: &CycleStats) {
        self.eligible += other.eligible;
        self.not_owned += other.not_owned;
        self.processed += other.processed;
        self.granted += other.granted;
        self.dry_run += other.dry_run;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.write_failures += other.write_failures;
        self.elapsed += other.elapsed;
    }
}

/// Totals for a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub totals: CycleStats,
    pub interrupted: bool,
}

/// Order records by band, stable within a band, then cap
///
/// Bands: has a folder id, folder existence not known to be false,
/// folder known missing.
pub fn prioritize(mut records: Vec<Record>, max_per_run: usize) -> Vec<Record> {
    records.sort_by_key(|r| {
        if r.folder_id.is_some() {
            0
        } else if r.folder_exists != Some(false) {
            1
        } else {
            2
        }
    });
    records.truncate(max_per_run);
    records
}

/// Drives a worker's share of the sheet
pub struct BatchProcessor {
    config: Arc<WorkerConfig>,
    sheet: SheetClient,
    drive: Arc<dyn ResourceStore>,
    executor: Arc<Executor>,
    resolver: Resolver,
    worklog: WorkLog,
    reporter: Option<ProgressReporter>,
    session: Uuid,
    shutdown: Arc<AtomicBool>,
}

impl BatchProcessor {
    /// Create a processor; the executor is built from the configured
    /// throttle and jitter bounds
    ///
    /// Folder store calls stop waiting once the shutdown flag is set. Sheet
    /// writes are left to finish so a completed grant is still recorded.
    pub fn new(
        config: Arc<WorkerConfig>,
        sheet: Arc<dyn TabularStore>,
        drive: Arc<dyn ResourceStore>,
        cache: ResolutionCache,
        worklog: WorkLog,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let executor = Arc::new(
            Executor::new(config.throttle, config.throttle_jitter, config.backoff_jitter)
                .with_shutdown(shutdown.clone()),
        );
        let sheet_executor = Arc::new(Executor::new(
            Duration::ZERO,
            Duration::ZERO,
            config.backoff_jitter,
        ));
        let resolver = Resolver::new(drive.clone(), executor.clone(), cache, config.search_timeout);
        let reporter = config.show_progress.then(ProgressReporter::new);

        Self {
            sheet: SheetClient::new(sheet, sheet_executor),
            drive,
            executor,
            resolver,
            worklog,
            reporter,
            session: Uuid::new_v4(),
            shutdown,
            config,
        }
    }

    /// Flag that stops the run between records
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// Folder store attempts made so far
    pub fn remote_attempts(&self) -> u64 {
        self.executor.attempts()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn log(&self, event: LogEvent) {
        if let Err(e) = self.worklog.record(&event) {
            warn!(path = %self.worklog.path().display(), error = %e, "Failed to write worker log");
        }
    }

    /// Run one cycle, or cycles until interrupted in loop mode
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.log(LogEvent::SessionStart {
            index: self.config.shard.index,
            total: self.config.shard.total,
            session: self.session,
            dry_run: self.config.dry_run,
        });
        info!(
            session = %self.session,
            shard_index = self.config.shard.index,
            shard_total = self.config.shard.total,
            dry_run = self.config.dry_run,
            log = %self.worklog.path().display(),
            "Worker session started"
        );

        loop {
            match self.run_cycle().await {
                Ok(stats) => {
                    summary.cycles += 1;
                    summary.totals.absorb(&stats);
                }
                Err(e) if e.is_fatal_setup() || !self.config.run_loop => return Err(e),
                Err(e) => {
                    error!(error = %e, "Cycle failed, retrying after poll interval");
                    self.log(LogEvent::Note(format!("Cycle failed: {}", e)));
                }
            }

            if self.is_shutdown() {
                summary.interrupted = true;
                break;
            }
            if !self.config.run_loop {
                break;
            }

            debug!(secs = self.config.poll_interval.as_secs(), "Sleeping until next cycle");
            if self.sleep_interruptible(self.config.poll_interval).await {
                summary.interrupted = true;
                break;
            }
        }

        if let Some(reporter) = &self.reporter {
            reporter.finish_and_clear();
        }
        Ok(summary)
    }

    /// Sleep, waking early on shutdown; returns true when interrupted
    async fn sleep_interruptible(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.is_shutdown() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(SHUTDOWN_POLL)).await;
        }
        self.is_shutdown()
    }

    /// One read → filter → shard → prioritize → process pass
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let start = Instant::now();
        let mut stats = CycleStats::default();

        // Step 1: read and detect columns
        let (snapshot, header_error) = self.sheet.load().await?;
        if let Some(e) = header_error {
            warn!(error = %e, "Failed to write header; new columns will be retried next cycle");
            stats.write_failures += 1;
        }
        let columns = snapshot.columns;
        let total_rows = snapshot.records.len();

        // Step 2: tri-state gate
        let eligible: Vec<Record> = snapshot
            .records
            .into_iter()
            .filter(|r| r.status.is_eligible())
            .collect();
        stats.eligible = eligible.len() as u64;

        // Step 3: shard
        let (owned, others): (Vec<Record>, Vec<Record>) =
            eligible.into_iter().partition(|r| self.config.shard.owns(r));
        stats.not_owned = others.len() as u64;

        // Step 4: prioritize
        let batch = prioritize(owned, self.config.max_per_run);

        info!(
            rows = total_rows,
            eligible = stats.eligible,
            owned = stats.eligible - stats.not_owned,
            batch = batch.len(),
            "Cycle started"
        );
        self.log(LogEvent::Processing { count: batch.len() });
        if let Some(reporter) = &self.reporter {
            reporter.start_cycle(batch.len());
        }

        // Step 5: process
        let mut seen = HashSet::new();
        for record in &batch {
            if self.is_shutdown() {
                info!(processed = stats.processed, "Shutdown requested, stopping cycle");
                break;
            }
            if let Some(reporter) = &self.reporter {
                reporter.set_status(&record.label());
            }

            let Some(report) = self.process_record(record, &mut seen).await else {
                info!(row = record.row + 1, "Shutdown interrupted record, leaving it unset");
                break;
            };
            stats.write_failures += self.persist_outcome(&columns, record, &report).await;
            stats.record(&report.outcome);

            if let Some(reporter) = &self.reporter {
                reporter.outcome(&report);
            }
        }

        stats.elapsed = start.elapsed();
        self.log(LogEvent::CycleSummary {
            granted: stats.granted,
            dry_run: stats.dry_run,
            skipped: stats.skipped,
            errors: stats.errors,
            elapsed_ms: stats.elapsed.as_millis() as u64,
        });
        info!(
            processed = stats.processed,
            granted = stats.granted,
            dry_run = stats.dry_run,
            skipped = stats.skipped,
            errors = stats.errors,
            write_failures = stats.write_failures,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        if let Some(reporter) = &self.reporter {
            reporter.summary(&stats);
        }

        Ok(stats)
    }

    /// Format, email and domain checks
    pub fn validate_record(&self, record: &Record) -> std::result::Result<(), SkipReason> {
        let name = record.name.trim();
        let email = record.email.trim();

        if name.is_empty() {
            return Err(SkipReason::InvalidFormat("missing name".into()));
        }
        if email.is_empty() {
            return Err(SkipReason::InvalidFormat("missing email".into()));
        }
        if !EMAIL_REGEX.is_match(email) {
            return Err(SkipReason::InvalidFormat(format!("malformed email '{}'", email)));
        }
        let domain = email.rsplit('@').next().unwrap_or_default();
        if !self.config.domain_allowed(domain) {
            return Err(SkipReason::InvalidFormat(format!("domain '{}' not allowed", domain)));
        }
        Ok(())
    }

    /// Drive one record to a terminal outcome
    ///
    /// `seen` holds the (name, email) keys already processed this cycle.
    /// Returns `None` when shutdown cut the record short; nothing is
    /// persisted for it and it stays eligible.
    pub async fn process_record(
        &self,
        record: &Record,
        seen: &mut HashSet<(String, String)>,
    ) -> Option<RecordReport> {
        let start = Instant::now();

        // Step 1: validation and duplicates
        if let Err(reason) = self.validate_record(record) {
            return Some(RecordReport::new(record, Outcome::Skipped(reason), None, start));
        }
        let key = (
            record.name.trim().to_lowercase(),
            record.email.trim().to_lowercase(),
        );
        if !seen.insert(key) {
            return Some(RecordReport::new(
                record,
                Outcome::Skipped(SkipReason::Duplicate),
                None,
                start,
            ));
        }

        // Step 2: resolution
        let folder = match &record.folder_id {
            Some(id) => FolderRef {
                id: id.clone(),
                origin: FolderOrigin::Sheet,
            },
            None => {
                let scope = self.config.root_folder_id.as_deref();
                match self.resolver.resolve(record.name.trim(), scope).await {
                    Some(resolved) => FolderRef {
                        id: resolved.id,
                        origin: FolderOrigin::Resolved(resolved.source),
                    },
                    None if self.is_shutdown() => return None,
                    None => return Some(RecordReport::new(record, Outcome::NotFound, None, start)),
                }
            }
        };

        // Step 3: existing permissions
        let email = record.email.trim();
        let role = self.config.role;
        let listed = self
            .executor
            .execute("permissions.list", &folder.id, &RetryPolicy::search(), || {
                self.drive.list_permissions(&folder.id)
            })
            .await;
        match listed {
            Ok(permissions) if permissions.iter().any(|p| p.grants(email, role)) => {
                return Some(RecordReport::new(
                    record,
                    Outcome::Skipped(SkipReason::AlreadyGranted),
                    Some(folder),
                    start,
                ));
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => return None,
            Err(e) => {
                warn!(folder_id = %folder.id, error = %e, "Permission check failed, attempting grant");
            }
        }

        // Step 4: grant
        if self.config.dry_run {
            return Some(RecordReport::new(record, Outcome::DryRun, Some(folder), start));
        }

        let request = PermissionRequest {
            email_address: email.to_string(),
            role,
            send_notification: self.config.notify,
        };
        let context = format!("folder={} email={}", folder.id, email);
        let created = self
            .executor
            .execute("permissions.create", &context, &RetryPolicy::mutation(), || {
                self.drive.create_permission(&folder.id, &request)
            })
            .await;

        let outcome = match created {
            Ok(permission) => {
                debug!(permission_id = %permission.id, folder_id = %folder.id, "Permission created");
                Outcome::Granted
            }
            Err(e) if e.is_cancelled() => return None,
            Err(e) => {
                warn!(folder_id = %folder.id, email, error = %e, "Grant failed");
                Outcome::GrantFailed(e.human_reason())
            }
        };
        Some(RecordReport::new(record, outcome, Some(folder), start))
    }

    /// Write the outcome back to the sheet and the worker log
    ///
    /// Every write is attempted independently. Returns the number of
    /// sheet writes that failed.
    pub async fn persist_outcome(
        &self,
        columns: &ColumnMap,
        record: &Record,
        report: &RecordReport,
    ) -> u64 {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut writes: Vec<(Column, String)> = Vec::new();

        if !self.config.dry_run {
            if let Some(status) = report.outcome.status_value() {
                writes.push((Column::IsShared, status.to_string()));
            }
        }
        writes.push((Column::LastLog, report.last_log(&now)));

        match (&report.folder, &report.outcome) {
            (Some(folder), _) => {
                if matches!(folder.origin, FolderOrigin::Resolved(_)) {
                    writes.push((Column::FolderId, folder.id.clone()));
                }
                if record.folder_exists != Some(true) {
                    writes.push((Column::IsFolderExists, "true".to_string()));
                }
            }
            (None, Outcome::NotFound) if record.folder_exists != Some(false) => {
                writes.push((Column::IsFolderExists, "false".to_string()));
            }
            _ => {}
        }

        let mut failures = 0;
        for (column, value) in &writes {
            if let Err(e) = self.sheet.update_cell(columns, record.row, *column, value).await {
                failures += 1;
                log_write_failure(&e, record, *column);
            }
        }

        self.log(report.log_event());

        match &report.outcome {
            Outcome::Granted | Outcome::DryRun => info!(
                row = record.row + 1,
                email = %report.email,
                folder_id = report.folder.as_ref().map(|f| f.id.as_str()).unwrap_or("-"),
                outcome = report.outcome.label(),
                "Record processed"
            ),
            Outcome::Skipped(reason) => info!(
                row = record.row + 1,
                name = %report.name,
                reason = reason.token(),
                "Record skipped"
            ),
            outcome => warn!(
                row = record.row + 1,
                name = %report.name,
                reason = %outcome.detail(),
                "Record failed"
            ),
        }

        failures
    }
}

fn log_write_failure(error: &SheetError, record: &Record, column: Column) {
    warn!(
        row = record.row + 1,
        column = column.header(),
        error = %error,
        "Sheet write failed"
    );
}
