//! Tabular Source Reader
//!
//! Loads a delimited file into ordered raw rows. Values stay as strings; type
//! coercion belongs to the record builder. Size limits are checked before any
//! row is handed out.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SourceError;

/// Reader limits and dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Field delimiter, must be ASCII
    pub delimiter: char,
    /// Maximum file size in bytes
    pub max_bytes: u64,
    /// Maximum number of data rows
    pub max_rows: usize,
    /// Trim surrounding whitespace from headers and cells
    pub trim: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            max_bytes: 16 * 1024 * 1024,
            max_rows: 100_000,
            trim: true,
        }
    }
}

impl SourceOptions {
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }
}

/// Whether a row matched the header width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RowShape {
    Complete,
    Malformed { expected: usize, found: usize },
}

/// One data row, cells by header position. Empty cells are absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    number: usize,
    line: u64,
    cells: Vec<Option<String>>,
    shape: RowShape,
}

impl RawRow {
    pub fn new(number: usize, line: u64, cells: Vec<Option<String>>, width: usize) -> Self {
        let shape = if cells.len() == width {
            RowShape::Complete
        } else {
            RowShape::Malformed {
                expected: width,
                found: cells.len(),
            }
        };
        Self {
            number,
            line,
            cells,
            shape,
        }
    }

    /// 1-based data row number (header excluded)
    pub fn number(&self) -> usize {
        self.number
    }

    /// Line in the source file where the row starts
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn shape(&self) -> RowShape {
        self.shape
    }

    /// Raw value at a header position, `None` when empty or past the row end
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|c| c.as_deref())
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }
}

/// Parsed source: header plus rows in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl SourceTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header names as they appear in the file, duplicates included
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of a named column in a row (first column with that name)
    pub fn value<'a>(&self, row: &'a RawRow, column: &str) -> Option<&'a str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| row.cell(idx))
    }
}

/// Load a delimited file from disk
pub fn load(path: &Path, options: &SourceOptions) -> Result<SourceTable, SourceError> {
    let metadata = fs::metadata(path).map_err(|e| io_error(path, e))?;
    if metadata.len() > options.max_bytes {
        return Err(SourceError::TooLarge {
            name: path.display().to_string(),
            size: metadata.len(),
            limit: options.max_bytes,
        });
    }

    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    load_bytes(&path.display().to_string(), &bytes, options)
}

/// Load delimited content already held in memory
pub fn load_bytes(
    name: &str,
    bytes: &[u8],
    options: &SourceOptions,
) -> Result<SourceTable, SourceError> {
    if bytes.len() as u64 > options.max_bytes {
        return Err(SourceError::TooLarge {
            name: name.to_string(),
            size: bytes.len() as u64,
            limit: options.max_bytes,
        });
    }

    let delimiter = u8::try_from(options.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| SourceError::Format {
            name: name.to_string(),
            line: None,
            message: format!("delimiter {:?} is not an ASCII character", options.delimiter),
        })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(if options.trim {
            csv::Trim::All
        } else {
            csv::Trim::None
        })
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| format_error(name, &e))?
        .iter()
        .map(str::to_string)
        .collect();

    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(SourceError::Format {
            name: name.to_string(),
            line: Some(1),
            message: "missing header row".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        if idx >= options.max_rows {
            return Err(SourceError::TooManyRows {
                name: name.to_string(),
                limit: options.max_rows,
            });
        }

        let record = result.map_err(|e| format_error(name, &e))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let cells = record
            .iter()
            .map(|v| (!v.is_empty()).then(|| v.to_string()))
            .collect();
        let row = RawRow::new(idx + 1, line, cells, columns.len());
        if let RowShape::Malformed { expected, found } = row.shape() {
            debug!(row = idx + 1, line, expected, found, "row width differs from header");
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(SourceError::Empty {
            name: name.to_string(),
        });
    }

    info!(
        source = name,
        columns = columns.len(),
        rows = rows.len(),
        "loaded tabular source"
    );

    Ok(SourceTable {
        name: name.to_string(),
        columns,
        rows,
    })
}

fn io_error(path: &Path, e: std::io::Error) -> SourceError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SourceError::NotFound {
            path: PathBuf::from(path),
        }
    } else {
        SourceError::Io {
            path: PathBuf::from(path),
            source: e,
        }
    }
}

fn format_error(name: &str, e: &csv::Error) -> SourceError {
    SourceError::Format {
        name: name.to_string(),
        line: e.position().map(|p| p.line()),
        message: e.to_string(),
    }
}
