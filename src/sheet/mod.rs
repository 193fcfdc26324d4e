//! Tabular store I/O
//!
//! The recipient list lives in a grid with a header row. Column positions
//! are never hard-coded: every cycle re-detects them from the header, so
//! columns may be moved or inserted between cycles.
//!
//! - Mandatory columns (Name, Email) accept several spellings
//! - Auxiliary columns (FolderId, isShared, isFolderExists, LastLog) are
//!   appended to the header when missing
//! - Cell writes return typed results; the caller decides to log and go on

mod google;
mod memory;

pub use google::GoogleSheets;
pub use memory::MemorySheet;

use crate::error::{RemoteResult, SheetError, SheetResult};
use crate::retry::{Executor, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Grid access needed by the granter
///
/// Row 0 is the header row; columns are zero-based.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Sheet (tab) name, for messages
    fn sheet_name(&self) -> &str;

    /// Every row of the sheet, header first
    async fn read_rows(&self) -> RemoteResult<Vec<Vec<String>>>;

    /// Overwrite one cell
    async fn write_cell(&self, row: usize, col: usize, value: &str) -> RemoteResult<()>;

    /// Overwrite the header row
    async fn write_header(&self, header: &[String]) -> RemoteResult<()>;
}

/// Logical columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Name,
    Email,
    FolderId,
    IsShared,
    IsFolderExists,
    LastLog,
}

impl Column {
    /// Columns appended when missing
    pub const AUXILIARY: [Column; 4] = [
        Column::FolderId,
        Column::IsShared,
        Column::IsFolderExists,
        Column::LastLog,
    ];

    /// Header written when the column is created
    pub fn header(self) -> &'static str {
        match self {
            Column::Name => "Name",
            Column::Email => "Email",
            Column::FolderId => "FolderId",
            Column::IsShared => "isShared",
            Column::IsFolderExists => "isFolderExists",
            Column::LastLog => "LastLog",
        }
    }

    /// Accepted header spellings, lowercase
    pub fn synonyms(self) -> &'static [&'static str] {
        match self {
            Column::Name => &[
                "name",
                "full name",
                "fullname",
                "display name",
                "participant",
                "participant name",
                "student name",
            ],
            Column::Email => &[
                "email",
                "e-mail",
                "email address",
                "mail",
                "gmail",
                "email id",
            ],
            Column::FolderId => &["folderid", "folder id", "folder_id"],
            Column::IsShared => &["isshared", "is shared", "shared"],
            Column::IsFolderExists => &["isfolderexists", "folder exists", "folderexists"],
            Column::LastLog => &["lastlog", "last log", "log"],
        }
    }

    fn matches(self, header: &str) -> bool {
        let header = header.trim().to_lowercase();
        self.synonyms().iter().any(|s| *s == header)
    }
}

/// Physical positions of the logical columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub name: usize,
    pub email: usize,
    pub folder_id: usize,
    pub is_shared: usize,
    pub folder_exists: usize,
    pub last_log: usize,
}

impl ColumnMap {
    /// Detect columns in a header row
    ///
    /// Returns the map and the header with any missing auxiliary columns
    /// appended.
    pub fn detect(header: &[String]) -> SheetResult<(ColumnMap, Vec<String>)> {
        let find = |column: Column| header.iter().position(|h| column.matches(h));

        let name = find(Column::Name).ok_or_else(|| missing(Column::Name))?;
        let email = find(Column::Email).ok_or_else(|| missing(Column::Email))?;

        let mut full_header = header.to_vec();
        let mut aux = [0usize; 4];
        for (slot, column) in aux.iter_mut().zip(Column::AUXILIARY) {
            *slot = match find(column) {
                Some(idx) => idx,
                None => {
                    full_header.push(column.header().to_string());
                    full_header.len() - 1
                }
            };
        }

        Ok((
            ColumnMap {
                name,
                email,
                folder_id: aux[0],
                is_shared: aux[1],
                folder_exists: aux[2],
                last_log: aux[3],
            },
            full_header,
        ))
    }

    /// Position of a logical column
    pub fn index(&self, column: Column) -> usize {
        match column {
            Column::Name => self.name,
            Column::Email => self.email,
            Column::FolderId => self.folder_id,
            Column::IsShared => self.is_shared,
            Column::IsFolderExists => self.folder_exists,
            Column::LastLog => self.last_log,
        }
    }
}

fn missing(column: Column) -> SheetError {
    SheetError::MissingColumn {
        column: column.header().to_string(),
        accepted: column.synonyms().join(", "),
    }
}

/// A1 column letters for a zero-based index (0 = A, 26 = AA)
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A1 reference for a zero-based row/column
pub fn cell_ref(row: usize, col: usize) -> String {
    format!("{}{}", column_letter(col), row + 1)
}

/// Persisted share status (`isShared` column)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShareStatus {
    /// Empty cell: eligible for processing
    #[default]
    Unset,
    /// "true": done
    Granted,
    /// "false": attempted and failed
    Failed,
    /// Any other non-empty value, left alone
    Other(String),
}

impl ShareStatus {
    /// Parse a cell (case-insensitive, trimmed)
    pub fn parse(cell: &str) -> Self {
        let trimmed = cell.trim();
        match trimmed.to_lowercase().as_str() {
            "" => ShareStatus::Unset,
            "true" => ShareStatus::Granted,
            "false" => ShareStatus::Failed,
            _ => ShareStatus::Other(trimmed.to_string()),
        }
    }

    /// Only an empty status is eligible
    pub fn is_eligible(&self) -> bool {
        matches!(self, ShareStatus::Unset)
    }
}

/// One recipient row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// Grid row (header = 0)
    pub row: usize,
    pub name: String,
    pub email: String,
    pub folder_id: Option<String>,
    pub status: ShareStatus,
    pub last_log: String,
    /// `isFolderExists`: None when blank or unparseable
    pub folder_exists: Option<bool>,
}

impl Record {
    /// Short label for logs and console
    pub fn label(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            format!("row {}", self.row + 1)
        } else {
            name.to_string()
        }
    }
}

/// Build records from the grid (row 0 is the header)
///
/// Rows whose cells are all empty strings are not records.
pub fn parse_records(rows: &[Vec<String>], map: &ColumnMap) -> Vec<Record> {
    let cell = |row: &Vec<String>, idx: usize| row.get(idx).cloned().unwrap_or_default();

    rows.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, row)| row.iter().any(|c| !c.is_empty()))
        .map(|(idx, row)| {
            let folder_id = cell(row, map.folder_id).trim().to_string();
            Record {
                row: idx,
                name: cell(row, map.name),
                email: cell(row, map.email),
                folder_id: (!folder_id.is_empty()).then_some(folder_id),
                status: ShareStatus::parse(&cell(row, map.is_shared)),
                last_log: cell(row, map.last_log),
                folder_exists: match cell(row, map.folder_exists).trim().to_lowercase().as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                },
            }
        })
        .collect()
}

/// A freshly read sheet
#[derive(Debug, Clone)]
pub struct SheetSnapshot {
    pub columns: ColumnMap,
    pub records: Vec<Record>,
}

/// Sheet access with retries and column bookkeeping
pub struct SheetClient {
    store: Arc<dyn TabularStore>,
    executor: Arc<Executor>,
}

impl SheetClient {
    pub fn new(store: Arc<dyn TabularStore>, executor: Arc<Executor>) -> Self {
        Self { store, executor }
    }

    /// Read the sheet and detect its columns
    ///
    /// Appends missing auxiliary headers; a failure to write them back is
    /// returned alongside the snapshot rather than aborting.
    pub async fn load(&self) -> SheetResult<(SheetSnapshot, Option<SheetError>)> {
        let sheet = self.store.sheet_name().to_string();
        let rows = self
            .executor
            .execute("values.get", &sheet, &RetryPolicy::sheet_write(), || {
                self.store.read_rows()
            })
            .await
            .map_err(|source| SheetError::ReadFailed {
                sheet: sheet.clone(),
                source,
            })?;

        let header = rows.first().ok_or_else(|| SheetError::EmptySheet {
            sheet: sheet.clone(),
        })?;
        let (columns, full_header) = ColumnMap::detect(header)?;

        let mut header_error = None;
        if full_header.len() != header.len() {
            info!(
                sheet = %sheet,
                added = ?&full_header[header.len()..],
                "Appending missing columns to header"
            );
            if let Err(source) = self
                .executor
                .execute("values.update", "header", &RetryPolicy::sheet_write(), || {
                    self.store.write_header(&full_header)
                })
                .await
            {
                header_error = Some(SheetError::WriteFailed {
                    cell: format!("{}:{}", cell_ref(0, 0), cell_ref(0, full_header.len() - 1)),
                    source,
                });
            }
        }

        let records = parse_records(&rows, &columns);
        debug!(sheet = %sheet, records = records.len(), ?columns, "Sheet loaded");

        Ok((SheetSnapshot { columns, records }, header_error))
    }

    /// Write one logical cell of a record's row
    pub async fn update_cell(
        &self,
        columns: &ColumnMap,
        row: usize,
        column: Column,
        value: &str,
    ) -> SheetResult<()> {
        let col = columns.index(column);
        let cell = cell_ref(row, col);
        let result = self
            .executor
            .execute("values.update", &cell, &RetryPolicy::sheet_write(), || {
                self.store.write_cell(row, col, value)
            })
            .await;
        result.map_err(|source| SheetError::WriteFailed { cell, source })
    }
}
