//! drive-share - Bulk Folder Sharing from a Spreadsheet
//!
//! Grants folder permissions in a Drive-style folder store to the
//! recipients listed in a spreadsheet, across several independent worker
//! processes, and monitors those workers from their log files.
//!
//! # Features
//!
//! - **Static Partitioning**: each worker hashes every record and keeps
//!   only its own slot; no coordination between workers.
//!
//! - **Rate-Limited Retries**: throttled remote calls with exponential
//!   backoff and jitter on rate-limit responses.
//!
//! - **Folder Resolution**: names resolve through a preloaded cache, name
//!   variations, then a bounded live search.
//!
//! - **Idempotent Progress**: each record's status lives in the sheet;
//!   a set status is never processed again.
//!
//! - **Log-Based Monitoring**: per-worker state is rebuilt from the
//!   append-only worker logs.
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────────────┐        ┌──────────────────────┐
//!          │   Spreadsheet        │        │   Folder store       │
//!          │ Name Email FolderId  │        │  folders/permissions │
//!          │ isShared LastLog ... │        └──────────▲───────────┘
//!          └──────────▲───────────┘                   │
//!                     │ read / cell writes            │ throttled + retried
//!   ┌─────────────────┼───────────────────────────────┼─────────────┐
//!   │ worker i of N   │                               │             │
//!   │   read → gate → shard → prioritize → validate → resolve →     │
//!   │   permission check → grant → persist                          │
//!   └─────────────────┬─────────────────────────────────────────────┘
//!                     │ append
//!                     ▼
//!            logs/worker-<i>-<stamp>.log
//!                     │ read only
//!                     ▼
//!          drive-share monitor / tail
//! ```
//!
//! # Example
//!
//! ```bash
//! # One worker of four
//! drive-share work --spreadsheet-id 1AbC --shard-total 4 --shard-index 0 --loop
//!
//! # Watch all workers
//! drive-share monitor --log-dir logs
//! ```

pub mod config;
pub mod drive;
pub mod error;
pub mod http;
pub mod monitor;
pub mod partition;
pub mod processor;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod sheet;
pub mod worklog;

pub use config::{CliArgs, MonitorConfig, ShardSpec, TailConfig, WorkerConfig};
pub use error::{Result, ShareError};
pub use processor::{BatchProcessor, CycleStats, Outcome, RunSummary};
