//! Sheets v4 values API implementation of [`TabularStore`]

use super::{cell_ref, TabularStore};
use crate::error::RemoteResult;
use crate::http::ApiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    range: &'a str,
    values: Vec<Vec<&'a str>>,
}

/// Render a cell value the way it is shown in the grid
fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Quote a sheet name for an A1 range
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Google Sheets client bound to one sheet of one spreadsheet
pub struct GoogleSheets {
    api: ApiClient,
    spreadsheet_id: String,
    sheet: String,
}

impl GoogleSheets {
    pub fn new(api: ApiClient, spreadsheet_id: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            api,
            spreadsheet_id: spreadsheet_id.into(),
            sheet: sheet.into(),
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/{}/values/{}", SHEETS_URL, self.spreadsheet_id, range)
    }

    async fn update(&self, range: &str, values: Vec<Vec<&str>>) -> RemoteResult<()> {
        let body = UpdateBody { range, values };
        self.api
            .send(
                self.api
                    .put(&self.values_url(range))
                    .query(&[("valueInputOption", "RAW")])
                    .json(&body),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TabularStore for GoogleSheets {
    fn sheet_name(&self) -> &str {
        &self.sheet
    }

    async fn read_rows(&self) -> RemoteResult<Vec<Vec<String>>> {
        let range: ValueRange = self
            .api
            .send_json(
                self.api
                    .get(&self.values_url(&quote_sheet(&self.sheet)))
                    .query(&[("valueRenderOption", "FORMATTED_VALUE")]),
            )
            .await?;

        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn write_cell(&self, row: usize, col: usize, value: &str) -> RemoteResult<()> {
        let range = format!("{}!{}", quote_sheet(&self.sheet), cell_ref(row, col));
        self.update(&range, vec![vec![value]]).await
    }

    async fn write_header(&self, header: &[String]) -> RemoteResult<()> {
        let last = header.len().saturating_sub(1);
        let range = format!(
            "{}!{}:{}",
            quote_sheet(&self.sheet),
            cell_ref(0, 0),
            cell_ref(0, last)
        );
        let row = header.iter().map(String::as_str).collect();
        self.update(&range, vec![row]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_sheet() {
        assert_eq!(quote_sheet("Sheet1"), "'Sheet1'");
        assert_eq!(quote_sheet("Bob's list"), "'Bob''s list'");
    }

    #[test]
    fn test_decode_ragged_values() {
        let json = r#"{"range": "Sheet1!A1:C3", "values": [["Name", "Email"], ["Alice", "a@gmail.com", true], []]}"#;
        let range: ValueRange = serde_json::from_str(json).unwrap();
        let rows: Vec<Vec<String>> = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        assert_eq!(rows[1][2], "true");
        assert!(rows[2].is_empty());
    }
}
