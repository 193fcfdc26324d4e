//! In-memory tabular store for tests and local runs

use super::TabularStore;
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    rows: Vec<Vec<String>>,
    read_faults: VecDeque<RemoteError>,
    /// (column, error); `None` matches any column
    write_faults: VecDeque<(Option<usize>, RemoteError)>,
    reads: u64,
    writes: u64,
}

/// In-memory [`TabularStore`]
pub struct MemorySheet {
    name: String,
    state: Mutex<State>,
}

impl MemorySheet {
    /// Sheet with the given header and no data rows
    pub fn new(name: &str, header: &[&str]) -> Self {
        let sheet = Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        };
        sheet.push_row(header);
        sheet
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a row
    pub fn push_row(&self, cells: &[&str]) {
        self.state()
            .rows
            .push(cells.iter().map(|c| c.to_string()).collect());
    }

    /// Copy of the whole grid
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.state().rows.clone()
    }

    /// Cell under the header named `column` (exact match), empty if absent
    pub fn cell(&self, row: usize, column: &str) -> String {
        let state = self.state();
        let Some(col) = state
            .rows
            .first()
            .and_then(|h| h.iter().position(|c| c == column))
        else {
            return String::new();
        };
        state
            .rows
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `times` reads
    pub fn fail_reads(&self, error: RemoteError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.read_faults.push_back(error.clone());
        }
    }

    /// Fail the next `times` cell writes, optionally only to one column
    pub fn fail_writes(&self, column: Option<usize>, error: RemoteError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.write_faults.push_back((column, error.clone()));
        }
    }

    /// Number of read calls
    pub fn reads(&self) -> u64 {
        self.state().reads
    }

    /// Number of cell and header write calls
    pub fn writes(&self) -> u64 {
        self.state().writes
    }
}

#[async_trait]
impl TabularStore for MemorySheet {
    fn sheet_name(&self) -> &str {
        &self.name
    }

    async fn read_rows(&self) -> RemoteResult<Vec<Vec<String>>> {
        let mut state = self.state();
        state.reads += 1;
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        Ok(state.rows.clone())
    }

    async fn write_cell(&self, row: usize, col: usize, value: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.writes += 1;

        let fault = state
            .write_faults
            .iter()
            .position(|(c, _)| c.map_or(true, |c| c == col));
        if let Some(idx) = fault {
            if let Some((_, err)) = state.write_faults.remove(idx) {
                return Err(err);
            }
        }

        if state.rows.len() <= row {
            state.rows.resize(row + 1, Vec::new());
        }
        let cells = &mut state.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value.to_string();
        Ok(())
    }

    async fn write_header(&self, header: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        state.writes += 1;
        match state.rows.first_mut() {
            Some(first) => *first = header.to_vec(),
            None => state.rows.push(header.to_vec()),
        }
        Ok(())
    }
}
