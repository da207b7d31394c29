//! In-memory tabular frame for exported records.
//!
//! Parses the portal's tab-delimited full-record export and assembles the
//! final output: per-DOI tables are concatenated by column name, the way a
//! dataframe concat would align them, with empty cells where a table lacks
//! a column.

use crate::error::{OptionExt, Result};
use std::path::Path;

/// Name of the appended column tying citing records back to the searched DOI
pub const CITING_DOI_COLUMN: &str = "citing_doi";

/// A header-addressed table of string cells.
///
/// Invariant: every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RecordTable {
    /// Create an empty table with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a tab-delimited export body. The first row is the header.
    ///
    /// Rows shorter than the header are padded with empty cells, longer
    /// rows are truncated. An entirely empty body is a parse error.
    pub fn from_tab_separated(bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let text: &str = text.as_ref();
        // The export carries a UTF-8 BOM
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let header = records.next().ok_or_parse("export body is empty")??;
        let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();

        let mut rows = Vec::new();
        for record in records {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of data rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a column holding `value` in every row, or overwrite an existing
    /// column of the same name.
    pub fn set_constant_column(&mut self, name: &str, value: &str) {
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.to_string();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.to_string());
                }
            }
        }
    }

    /// Append another table, aligning columns by name.
    ///
    /// The result holds the union of both column sets in first-seen order;
    /// cells for columns a row's source table lacks are empty.
    pub fn concat(&mut self, other: RecordTable) {
        if self.columns.is_empty() {
            *self = other;
            return;
        }

        for col in &other.columns {
            if !self.columns.iter().any(|c| c == col) {
                self.columns.push(col.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }

        // Per-column index into the incoming table
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.columns.iter().position(|o| o == c))
            .collect();

        for row in other.rows {
            let aligned: Vec<String> = mapping
                .iter()
                .map(|idx| idx.and_then(|i| row.get(i)).cloned().unwrap_or_default())
                .collect();
            self.rows.push(aligned);
        }
    }

    /// Write the table as a CSV file (header row first)
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> RecordTable {
        let mut t = RecordTable::new();
        t.columns = columns.iter().map(|c| c.to_string()).collect();
        t.rows = rows
            .iter()
            .map(|r| {
                let mut row: Vec<String> = r.iter().map(|c| c.to_string()).collect();
                row.resize(t.columns.len(), String::new());
                row
            })
            .collect();
        t
    }

    #[test]
    fn test_parse_tab_separated() {
        let body = "\u{feff}AU\tTI\tSO\nDoe, J\tOn Things\tNature\nRoe, R\tMore Things\tScience\n";
        let t = RecordTable::from_tab_separated(body.as_bytes()).expect("parse failed");
        assert_eq!(t.columns(), &["AU", "TI", "SO"]);
        assert_eq!(t.row_count(), 2);
    }

    #[test]
    fn test_parse_pads_short_rows() {
        let body = "AU\tTI\tSO\nDoe, J\tOn Things\n";
        let t = RecordTable::from_tab_separated(body.as_bytes()).expect("parse failed");
        assert_eq!(t.rows[0], vec!["Doe, J", "On Things", ""]);
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(RecordTable::from_tab_separated(b"").is_err());
    }

    #[test]
    fn test_set_constant_column() {
        let mut t = table(&["AU"], &[&["Doe, J"], &["Roe, R"]]);
        t.set_constant_column(CITING_DOI_COLUMN, "10.1000/xyz");
        assert_eq!(t.columns(), &["AU", CITING_DOI_COLUMN]);
        assert!(t.rows.iter().all(|r| r[1] == "10.1000/xyz"));

        // Overwrites in place on a second call
        t.set_constant_column(CITING_DOI_COLUMN, "");
        assert_eq!(t.columns().len(), 2);
        assert!(t.rows.iter().all(|r| r[1].is_empty()));
    }

    #[test]
    fn test_concat_aligns_columns() {
        let mut a = table(&["AU", "TI"], &[&["Doe, J", "On Things"]]);
        let b = table(&["TI", "PY"], &[&["Later Things", "2021"]]);
        a.concat(b);

        assert_eq!(a.columns(), &["AU", "TI", "PY"]);
        assert_eq!(a.rows[0], vec!["Doe, J", "On Things", ""]);
        assert_eq!(a.rows[1], vec!["", "Later Things", "2021"]);
    }

    #[test]
    fn test_concat_into_empty_adopts_columns() {
        let mut a = RecordTable::new();
        a.concat(table(&["AU"], &[&["Doe, J"]]));
        assert_eq!(a.columns(), &["AU"]);
        assert_eq!(a.row_count(), 1);
    }

    #[test]
    fn test_write_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let t = table(&["AU", "TI"], &[&["Doe, J", "On, Things"]]);
        t.write_csv(&path)?;

        let written = std::fs::read_to_string(&path)?;
        assert!(written.starts_with("AU,TI\n"));
        assert!(written.contains("\"On, Things\""));
        Ok(())
    }
}
