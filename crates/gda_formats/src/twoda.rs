//! Text 2DA rule tables.
//!
//! A 2DA file is a whitespace separated grid with a fixed signature line:
//!
//! ```text
//! 2DA V2.0
//! DEFAULT: 0
//!        Label      Name    HitDie
//! 0      Barbarian  1234    12
//! 1      Bard       ****    6
//! ```
//!
//! The first token of each data row is the row number and is not stored; rows are
//! addressed by position. `****` marks an empty cell. Tokens may be wrapped in
//! double quotes to carry embedded spaces.
//!
//! Parsed tables are immutable values. [`parse_2da`] is a free function with no
//! state carried between calls, so results can be cached and shared across threads.

use crate::error::{FormatError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Signature expected on the first non-empty line.
pub const TWODA_SIGNATURE: &str = "2DA";
/// Version tag expected after the signature.
pub const TWODA_VERSION: &str = "V2.0";
/// Placeholder used for empty cells.
pub const EMPTY_CELL: &str = "****";

/// A parsed rule table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    default_value: Option<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Create a table from column names and rows.
    ///
    /// Rows shorter than the column list are padded with empty cells; longer rows are
    /// truncated.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                row
            })
            .collect();
        Self {
            default_value: None,
            columns,
            rows,
        }
    }

    /// Set the value returned for cells that are empty.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Raw cell access. Returns `None` for empty cells and out-of-range positions.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Borrow a row as a [`RowView`].
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        (index < self.rows.len()).then_some(RowView { table: self, index })
    }

    /// Iterate over all rows.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.rows.len()).map(move |index| RowView { table: self, index })
    }

    /// Rough heap footprint in bytes, used for cache accounting.
    pub fn estimated_size(&self) -> usize {
        let header: usize = self.columns.iter().map(|c| c.len() + 24).sum();
        let cells: usize = self
            .rows
            .iter()
            .map(|row| {
                24 + row
                    .iter()
                    .map(|cell| 24 + cell.as_ref().map_or(0, String::len))
                    .sum::<usize>()
            })
            .sum();
        std::mem::size_of::<Self>() + header + cells
    }

    /// Render the table back to 2DA text.
    pub fn to_2da_string(&self) -> String {
        let mut out = format!("{TWODA_SIGNATURE} {TWODA_VERSION}\n");
        match &self.default_value {
            Some(default_value) => out.push_str(&format!("DEFAULT: {}\n", quote(default_value))),
            None => out.push('\n'),
        }
        out.push('\t');
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join("\t"),
        );
        out.push('\n');
        for (index, row) in self.rows.iter().enumerate() {
            out.push_str(&index.to_string());
            for cell in row {
                out.push('\t');
                match cell {
                    Some(value) => out.push_str(&quote(value)),
                    None => out.push_str(EMPTY_CELL),
                }
            }
            out.push('\n');
        }
        out
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> RowView<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cell value for a column (case-insensitive). Empty cells return `None`.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let column = self.table.column_index(column)?;
        self.table.cell(self.index, column)
    }

    /// Look up `name`, then each of `fallback_names` in order, returning the first
    /// non-empty cell. Falls back to the table's `DEFAULT:` value when every
    /// candidate is empty or missing.
    pub fn field(&self, name: &str, fallback_names: &[&str]) -> Option<&'a str> {
        std::iter::once(name)
            .chain(fallback_names.iter().copied())
            .find_map(|candidate| self.get(candidate))
            .or(self.table.default_value.as_deref())
    }

    /// Like [`field`](Self::field), parsed into `T`. Unparseable values are `None`.
    pub fn field_as<T: FromStr>(&self, name: &str, fallback_names: &[&str]) -> Option<T> {
        self.field(name, fallback_names)?.trim().parse().ok()
    }
}

/// Parse 2DA text.
pub fn parse_2da(bytes: &[u8]) -> Result<Table> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));

    let signature = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| FormatError::Truncated("empty 2DA".to_string()))?;
    let mut sig_tokens = signature.split_whitespace();
    let magic = sig_tokens.next().unwrap_or_default();
    if !magic.eq_ignore_ascii_case(TWODA_SIGNATURE) {
        return Err(FormatError::InvalidMagic {
            expected: TWODA_SIGNATURE,
            found: magic.to_string(),
        });
    }
    match sig_tokens.next() {
        Some(version) if version.eq_ignore_ascii_case(TWODA_VERSION) => {}
        Some(version) => return Err(FormatError::UnsupportedVersion(version.to_string())),
        None => return Err(FormatError::UnsupportedVersion(String::new())),
    }

    let mut default_value = None;
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for line in lines {
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            continue;
        }

        let width = match &columns {
            Some(columns) => columns.len(),
            None => {
                if tokens[0].eq_ignore_ascii_case("DEFAULT:") {
                    default_value = tokens.get(1).cloned();
                } else {
                    columns = Some(tokens);
                }
                continue;
            }
        };

        let mut cells: Vec<Option<String>> = tokens
            .into_iter()
            .skip(1)
            .map(|t| (t != EMPTY_CELL).then_some(t))
            .collect();
        if cells.len() > width {
            tracing::trace!(
                "2DA row {} has {} cells for {} columns; extra cells dropped",
                rows.len(),
                cells.len(),
                width
            );
        }
        cells.resize(width, None);
        rows.push(cells);
    }

    let columns = columns.ok_or_else(|| FormatError::Truncated("2DA has no column header".into()))?;

    Ok(Table {
        default_value,
        columns,
        rows,
    })
}

/// Split a line into whitespace separated tokens, honouring double quotes.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                token.push(c);
            }
            if !closed {
                return Err(FormatError::Malformed(format!(
                    "unterminated quote in line: {line}"
                )));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}
