//! ==============================================================================
//! table.rs - comma-separated table codec
//! ==============================================================================
//!
//! purpose:
//!     both blobs hold a csv rendering with a header row. cells are kept as
//!     text, so rows nobody touched render back exactly as they were read.
//!
//! relationships:
//!     - used by: store.rs (parse on load, render on save)
//!     - used by: normalize.rs, ingest.rs, editor.rs (row access and append)
//!
//! ==============================================================================

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("row {row} has {found} fields, header has {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unterminated quoted field")]
    UnterminatedQuote,
}

/// header + rows of text cells
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// parse csv text. empty text is an empty table with no columns.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let mut records = split_records(text)?.into_iter();
        let Some(columns) = records.next() else {
            return Ok(Self::default());
        };

        let mut rows = Vec::new();
        for (index, record) in records.enumerate() {
            if record.len() != columns.len() {
                return Err(TableError::Ragged {
                    row: index,
                    expected: columns.len(),
                    found: record.len(),
                });
            }
            rows.push(record);
        }
        Ok(Self { columns, rows })
    }

    /// render as csv with a trailing newline
    pub fn render(&self) -> String {
        let mut output = String::new();
        if self.columns.is_empty() {
            return output;
        }
        write_record(&mut output, &self.columns);
        for row in &self.rows {
            write_record(&mut output, row);
        }
        output
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.trim() == name)
    }

    /// cell text for `row` under column `name`
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let column = self.column_index(name)?;
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// add a column filled with empty cells, unless it already exists
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.columns.len() - 1
    }

    /// append one row given as (column, cell) pairs.
    /// unknown columns are added; columns not mentioned get an empty cell.
    pub fn push_record<'a, I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let cells: Vec<(&str, String)> = cells.into_iter().collect();
        for (name, _) in &cells {
            self.ensure_column(name);
        }
        let mut row = vec![String::new(); self.columns.len()];
        for (name, value) in cells {
            if let Some(index) = self.column_index(name) {
                row[index] = value;
            }
        }
        self.rows.push(row);
    }
}

fn split_records(text: &str) -> Result<Vec<Vec<String>>, TableError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut dirty = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                dirty = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                dirty = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if dirty || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                dirty = false;
            }
            _ => {
                field.push(c);
                dirty = true;
            }
        }
    }

    if in_quotes {
        return Err(TableError::UnterminatedQuote);
    }
    if dirty || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn write_record(output: &mut String, cells: &[String]) {
    for (index, cell) in cells.iter().enumerate() {
        if index > 0 {
            output.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            output.push('"');
            output.push_str(&cell.replace('"', "\"\""));
            output.push('"');
        } else {
            output.push_str(cell);
        }
    }
    output.push('\n');
}
