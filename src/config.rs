//! Configuration types for drive-share
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros (with env fallbacks)
//! - The optional TOML settings file written by the setup wizard
//! - Validated, immutable runtime configuration for workers and monitors
//!
//! Precedence for every worker option: command line flag, then environment
//! variable, then settings file, then built-in default.

use crate::drive::Role;
use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default spacing between throttled remote calls (ms)
pub const DEFAULT_THROTTLE_MS: u64 = 2500;

/// Default cap on records processed per cycle
pub const DEFAULT_MAX_PER_RUN: usize = 300;

/// Default pause between cycles in loop mode (seconds)
pub const DEFAULT_POLL_SECS: u64 = 30;

/// Poll interval floor (seconds)
pub const MIN_POLL_SECS: u64 = 5;

/// Default bound on the live fallback search (seconds)
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

/// Default number of worker slots shown by the monitor
pub const DEFAULT_MONITOR_SLOTS: usize = 8;

/// Upper bound on worker slots shown by the monitor
const MAX_MONITOR_SLOTS: usize = 64;

/// Default sheet tab
const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Default log directory
const DEFAULT_LOG_DIR: &str = "logs";

/// Default allow-listed recipient domain
const DEFAULT_ALLOWED_DOMAIN: &str = "gmail.com";

/// Grant folder access to the recipients listed in a spreadsheet
#[derive(Parser, Debug, Clone)]
#[command(
    name = "drive-share",
    version,
    about = "Grant folder access to the recipients listed in a spreadsheet",
    long_about = "Reads recipients from a spreadsheet, resolves each recipient's folder by name \n\
                  and grants access, writing progress back to the sheet.\n\n\
                  Run several workers side by side with --shard-total/--shard-index; \n\
                  watch them with the 'monitor' or 'tail' subcommands.",
    after_help = "EXAMPLES:\n    \
        drive-share work --spreadsheet-id 1AbC... --dry-run\n    \
        drive-share work --shard-total 4 --shard-index 2 --loop\n    \
        drive-share monitor --log-dir logs\n    \
        drive-share tail --log-dir logs --files 4"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Debug logging
    #[arg(long, env = "DEBUG", global = true)]
    pub debug: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Process this worker's share of the spreadsheet
    Work(WorkArgs),

    /// Show a live table of all workers, rebuilt from their log files
    Monitor(MonitorArgs),

    /// Follow the newest worker log files, interleaved and colored
    Tail(TailArgs),
}

/// Arguments for `drive-share work`
#[derive(Args, Debug, Clone, Default)]
pub struct WorkArgs {
    /// Settings file produced by the setup wizard
    #[arg(long, env = "DRIVE_SHARE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Spreadsheet holding the recipient list
    #[arg(long, env = "SPREADSHEET_ID", value_name = "ID")]
    pub spreadsheet_id: Option<String>,

    /// Sheet (tab) name
    #[arg(long, env = "SHEET_NAME", value_name = "NAME")]
    pub sheet_name: Option<String>,

    /// Restrict folder search to this folder tree
    #[arg(long, env = "ROOT_FOLDER_ID", value_name = "ID")]
    pub root_folder_id: Option<String>,

    /// Minimum delay between remote calls in milliseconds
    #[arg(long, env = "THROTTLE_MS", value_name = "MS")]
    pub throttle_ms: Option<u64>,

    /// Maximum records processed per cycle
    #[arg(long, env = "MAX_PER_RUN", value_name = "NUM")]
    pub max_per_run: Option<usize>,

    /// Seconds between cycles in loop mode (minimum 5)
    #[arg(long, env = "POLL_INTERVAL_SECONDS", value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Keep polling the sheet instead of exiting after one cycle
    #[arg(long = "loop", env = "LOOP")]
    pub run_loop: bool,

    /// Perform every step except the actual permission grant
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Total number of workers (0 disables sharding)
    #[arg(long, env = "SHARD_TOTAL", default_value = "0", value_name = "NUM")]
    pub shard_total: usize,

    /// This worker's index in [0, shard-total)
    #[arg(long, env = "SHARD_INDEX", default_value = "0", value_name = "NUM")]
    pub shard_index: usize,

    /// Directory for worker log files
    #[arg(long, env = "LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// JSON file mapping folder names to folder ids
    #[arg(long, env = "FOLDER_CACHE", value_name = "FILE")]
    pub folder_cache: Option<PathBuf>,

    /// Recipient email domains accepted (comma separated)
    #[arg(long, env = "ALLOWED_DOMAINS", value_delimiter = ',', value_name = "DOMAINS")]
    pub allowed_domains: Option<Vec<String>>,

    /// Role to grant (reader, commenter, writer, ...)
    #[arg(long, env = "GRANT_ROLE", value_name = "ROLE")]
    pub role: Option<String>,

    /// Send the sharing notification email
    #[arg(long, env = "SEND_NOTIFICATION")]
    pub notify: bool,

    /// Bound on the live folder search in seconds
    #[arg(long, env = "SEARCH_TIMEOUT_SECONDS", value_name = "SECS")]
    pub search_timeout: Option<u64>,

    /// OAuth access token for the Sheets and Drive APIs
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// Suppress the progress spinner
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Arguments for `drive-share monitor`
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Directory holding worker log files
    #[arg(long, env = "LOG_DIR", default_value = DEFAULT_LOG_DIR, value_name = "DIR")]
    pub log_dir: PathBuf,

    /// Number of worker slots to display
    #[arg(long, default_value_t = DEFAULT_MONITOR_SLOTS, value_name = "NUM")]
    pub slots: usize,

    /// Refresh interval in milliseconds
    #[arg(long, default_value = "2000", value_name = "MS")]
    pub interval_ms: u64,

    /// Lock file guarding against a second monitor
    #[arg(long, value_name = "FILE")]
    pub lock_file: Option<PathBuf>,

    /// Render once and exit
    #[arg(long)]
    pub once: bool,
}

/// Arguments for `drive-share tail`
#[derive(Args, Debug, Clone)]
pub struct TailArgs {
    /// Directory holding worker log files
    #[arg(long, env = "LOG_DIR", default_value = DEFAULT_LOG_DIR, value_name = "DIR")]
    pub log_dir: PathBuf,

    /// Follow the N most recently modified log files
    #[arg(long, default_value_t = DEFAULT_MONITOR_SLOTS, value_name = "NUM")]
    pub files: usize,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "500", value_name = "MS")]
    pub interval_ms: u64,

    /// Lock file guarding against a second monitor
    #[arg(long, value_name = "FILE")]
    pub lock_file: Option<PathBuf>,
}

/// Settings file contents (all optional)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub spreadsheet_id: Option<String>,
    pub sheet_name: Option<String>,
    pub root_folder_id: Option<String>,
    pub throttle_ms: Option<u64>,
    pub max_per_run: Option<usize>,
    pub poll_interval_seconds: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub folder_cache: Option<PathBuf>,
    pub allowed_domains: Option<Vec<String>>,
    pub role: Option<String>,
    pub search_timeout_seconds: Option<u64>,
}

impl Settings {
    /// Load a settings file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse settings from TOML text
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

/// Static partition assignment for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardSpec {
    /// Total number of workers (0 = sharding disabled)
    pub total: usize,

    /// This worker's index
    pub index: usize,
}

impl ShardSpec {
    /// Validate and build a shard assignment
    pub fn new(total: usize, index: usize) -> Result<Self, ConfigError> {
        if total > 0 && index >= total {
            return Err(ConfigError::InvalidShard { index, total });
        }
        Ok(Self { total, index })
    }

    /// Single-worker mode
    pub fn disabled() -> Self {
        Self { total: 0, index: 0 }
    }

    /// Whether partitioning is active
    pub fn is_enabled(&self) -> bool {
        self.total > 0
    }
}

/// Validated runtime configuration for a worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Spreadsheet holding the recipient list
    pub spreadsheet_id: String,

    /// Sheet (tab) name
    pub sheet_name: String,

    /// Optional scope root for folder search
    pub root_folder_id: Option<String>,

    /// Minimum spacing between throttled remote calls
    pub throttle: Duration,

    /// Upper bound of the throttle jitter
    pub throttle_jitter: Duration,

    /// Upper bound of the backoff jitter
    pub backoff_jitter: Duration,

    /// Cap on records per cycle
    pub max_per_run: usize,

    /// Pause between cycles
    pub poll_interval: Duration,

    /// Repeat cycles until interrupted
    pub run_loop: bool,

    /// Skip the actual grant
    pub dry_run: bool,

    /// Static partition assignment
    pub shard: ShardSpec,

    /// Directory for worker log files
    pub log_dir: PathBuf,

    /// Folder name cache file
    pub folder_cache: Option<PathBuf>,

    /// Accepted recipient domains, lowercase (empty = any)
    pub allowed_domains: Vec<String>,

    /// Role granted to recipients
    pub role: Role,

    /// Send sharing notification email
    pub notify: bool,

    /// Bound on the live folder search
    pub search_timeout: Duration,

    /// Show the progress spinner
    pub show_progress: bool,
}

impl WorkerConfig {
    /// Configuration with built-in defaults for the given spreadsheet
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            root_folder_id: None,
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            throttle_jitter: Duration::from_millis(400),
            backoff_jitter: Duration::from_millis(500),
            max_per_run: DEFAULT_MAX_PER_RUN,
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            run_loop: false,
            dry_run: false,
            shard: ShardSpec::disabled(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            folder_cache: None,
            allowed_domains: vec![DEFAULT_ALLOWED_DOMAIN.to_string()],
            role: Role::Reader,
            notify: false,
            search_timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
            show_progress: true,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &WorkArgs) -> Result<Self, ConfigError> {
        let settings = match &args.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        Self::from_layers(args, settings)
    }

    /// Merge CLI/env arguments over a settings file
    pub fn from_layers(args: &WorkArgs, settings: Settings) -> Result<Self, ConfigError> {
        let spreadsheet_id = args
            .spreadsheet_id
            .clone()
            .or(settings.spreadsheet_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired("spreadsheet id (SPREADSHEET_ID)".into()))?;

        let mut config = Self::new(spreadsheet_id.trim());

        if let Some(name) = args.sheet_name.clone().or(settings.sheet_name) {
            config.sheet_name = name;
        }

        config.root_folder_id = args
            .root_folder_id
            .clone()
            .or(settings.root_folder_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if let Some(ms) = args.throttle_ms.or(settings.throttle_ms) {
            config.throttle = Duration::from_millis(ms);
        }

        // Flag or environment beats the settings file
        if let Some(max) = args.max_per_run.or(settings.max_per_run) {
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "max per run".into(),
                    reason: "must be at least 1".into(),
                });
            }
            config.max_per_run = max;
        }

        if let Some(secs) = args.poll_interval.or(settings.poll_interval_seconds) {
            config.poll_interval = Duration::from_secs(secs.max(MIN_POLL_SECS));
        }

        if let Some(secs) = args.search_timeout.or(settings.search_timeout_seconds) {
            config.search_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(dir) = args.log_dir.clone().or(settings.log_dir) {
            config.log_dir = dir;
        }

        config.folder_cache = args.folder_cache.clone().or(settings.folder_cache);

        if let Some(domains) = args.allowed_domains.clone().or(settings.allowed_domains) {
            config.allowed_domains = normalize_domains(&domains);
        }

        if let Some(role) = args.role.clone().or(settings.role) {
            config.role = role
                .parse()
                .map_err(|_| ConfigError::InvalidRole(role.clone()))?;
        }

        config.shard = ShardSpec::new(args.shard_total, args.shard_index)?;
        config.run_loop = args.run_loop;
        config.dry_run = args.dry_run;
        config.notify = args.notify;
        config.show_progress = !args.quiet;

        Ok(config)
    }

    /// Whether a recipient domain is accepted
    pub fn domain_allowed(&self, domain: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let domain = domain.trim().to_lowercase();
        self.allowed_domains.iter().any(|d| *d == domain)
    }
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .map(|d| d.trim().trim_start_matches('@').to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Validated configuration for the table monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory holding worker log files
    pub log_dir: PathBuf,

    /// Number of slots rendered
    pub max_slots: usize,

    /// Redraw interval
    pub refresh: Duration,

    /// A log modified within this window counts as live
    pub freshness: Duration,

    /// Single-instance lock file
    pub lock_path: PathBuf,

    /// Render once and exit
    pub once: bool,
}

impl MonitorConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &MonitorArgs) -> Result<Self, ConfigError> {
        let max_slots = validate_slots(args.slots)?;
        Ok(Self {
            lock_path: args
                .lock_file
                .clone()
                .unwrap_or_else(|| args.log_dir.join(".monitor.lock")),
            log_dir: args.log_dir.clone(),
            max_slots,
            refresh: Duration::from_millis(args.interval_ms.max(100)),
            freshness: Duration::from_secs(15),
            once: args.once,
        })
    }
}

/// Validated configuration for the live tail
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Directory holding worker log files
    pub log_dir: PathBuf,

    /// Number of most recent files followed
    pub max_files: usize,

    /// Poll interval
    pub poll: Duration,

    /// Cap on bytes read per file per poll
    pub max_read_bytes: usize,

    /// Single-instance lock file
    pub lock_path: PathBuf,
}

impl TailConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &TailArgs) -> Result<Self, ConfigError> {
        let max_files = validate_slots(args.files)?;
        Ok(Self {
            lock_path: args
                .lock_file
                .clone()
                .unwrap_or_else(|| args.log_dir.join(".tail.lock")),
            log_dir: args.log_dir.clone(),
            max_files,
            poll: Duration::from_millis(args.interval_ms.max(50)),
            max_read_bytes: 256 * 1024,
        })
    }
}

fn validate_slots(slots: usize) -> Result<usize, ConfigError> {
    if slots == 0 || slots > MAX_MONITOR_SLOTS {
        return Err(ConfigError::InvalidValue {
            name: "slots".into(),
            reason: format!("must be between 1 and {}", MAX_MONITOR_SLOTS),
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_sheet() -> WorkArgs {
        WorkArgs {
            spreadsheet_id: Some("sheet-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_layers(&args_with_sheet(), Settings::default()).unwrap();
        assert_eq!(config.sheet_name, "Sheet1");
        assert_eq!(config.throttle, Duration::from_millis(2500));
        assert_eq!(config.max_per_run, 300);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.role, Role::Reader);
        assert!(!config.shard.is_enabled());
    }

    #[test]
    fn test_missing_spreadsheet() {
        let err = WorkerConfig::from_layers(&WorkArgs::default(), Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
    }

    #[test]
    fn test_poll_interval_floor() {
        let args = WorkArgs {
            poll_interval: Some(1),
            ..args_with_sheet()
        };
        let config = WorkerConfig::from_layers(&args, Settings::default()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_flag_overrides_settings_file() {
        let settings = Settings::parse(
            r#"
            spreadsheet_id = "from-file"
            max_per_run = 50
            throttle_ms = 1000
            allowed_domains = ["Example.org", "@gmail.com"]
            "#,
        )
        .unwrap();

        let args = WorkArgs {
            max_per_run: Some(120),
            ..WorkArgs::default()
        };
        let config = WorkerConfig::from_layers(&args, settings).unwrap();
        assert_eq!(config.spreadsheet_id, "from-file");
        assert_eq!(config.max_per_run, 120);
        assert_eq!(config.throttle, Duration::from_millis(1000));
        assert_eq!(config.allowed_domains, vec!["example.org", "gmail.com"]);
    }

    #[test]
    fn test_unknown_settings_key_rejected() {
        assert!(Settings::parse("spreadsheet = \"x\"").is_err());
    }

    #[test]
    fn test_invalid_shard() {
        let args = WorkArgs {
            shard_total: 2,
            shard_index: 2,
            ..args_with_sheet()
        };
        let err = WorkerConfig::from_layers(&args, Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShard { index: 2, total: 2 }));
    }

    #[test]
    fn test_invalid_role() {
        let args = WorkArgs {
            role: Some("admin".into()),
            ..args_with_sheet()
        };
        assert!(matches!(
            WorkerConfig::from_layers(&args, Settings::default()),
            Err(ConfigError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_domain_allowed() {
        let mut config = WorkerConfig::new("s");
        assert!(config.domain_allowed("GMAIL.com"));
        assert!(!config.domain_allowed("example.org"));

        config.allowed_domains.clear();
        assert!(config.domain_allowed("example.org"));
    }

    #[test]
    fn test_monitor_slots_validated() {
        let args = MonitorArgs {
            log_dir: PathBuf::from("logs"),
            slots: 0,
            interval_ms: 2000,
            lock_file: None,
            once: false,
        };
        assert!(MonitorConfig::from_args(&args).is_err());

        let args = MonitorArgs { slots: 4, ..args };
        let config = MonitorConfig::from_args(&args).unwrap();
        assert_eq!(config.lock_path, PathBuf::from("logs/.monitor.lock"));
        assert_eq!(config.freshness, Duration::from_secs(15));
    }
}
