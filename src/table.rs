// In-memory tabular dataset.
//
// Invoice exports are small, so a row-major table of optional strings is
// enough. Typed views (integers, floats) are derived on demand by the
// cleaning steps instead of being fixed at load time, because the column
// meaning is only known after the names have been standardized.
use crate::util::{parse_f64_safe, parse_i64_safe};
use std::collections::HashSet;

pub type Cell = Option<String>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Data type of a column, inferred over its non-empty values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Bool,
    Text,
    Empty,
}

impl ColumnKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Bool => "bool",
            ColumnKind::Text => "text",
            ColumnKind::Empty => "empty",
        }
    }
}

/// Normalize a raw cell: trim and map blanks to `None`.
pub fn clean_cell(s: &str) -> Cell {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, None);
                r
            })
            .collect();
        Table { columns, rows }
    }

    /// Build a table from string literals; `""` becomes an empty cell.
    pub fn from_str_rows(columns: &[&str], rows: &[Vec<&str>]) -> Self {
        Table::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| clean_cell(v)).collect())
                .collect(),
        )
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    /// Index of the first column with this name.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.col_index(name).is_some()
    }

    pub fn column(&self, idx: usize) -> Vec<Option<&str>> {
        self.rows.iter().map(|r| r[idx].as_deref()).collect()
    }

    /// Non-empty values of a column, in row order.
    pub fn values(&self, idx: usize) -> Vec<&str> {
        self.rows.iter().filter_map(|r| r[idx].as_deref()).collect()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows[row][col].as_deref()
    }

    pub fn set(&mut self, row: usize, col: usize, value: Cell) {
        self.rows[row][col] = value;
    }

    pub fn push_column(&mut self, name: &str, values: Vec<Cell>) {
        self.columns.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.push(v);
        }
    }

    pub fn kind(&self, idx: usize) -> ColumnKind {
        infer_kind(&self.values(idx))
    }

    pub fn n_unique(&self, idx: usize) -> usize {
        self.values(idx).into_iter().collect::<HashSet<_>>().len()
    }

    /// Distinct tuples over the given columns, first-seen order. Rows where
    /// every selected cell is empty are still kept as one tuple.
    pub fn unique_tuples(&self, cols: &[usize]) -> Vec<Vec<Cell>> {
        let mut seen: HashSet<Vec<Cell>> = HashSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            let t: Vec<Cell> = cols.iter().map(|&c| row[c].clone()).collect();
            if seen.insert(t.clone()) {
                out.push(t);
            }
        }
        out
    }

    /// Number of distinct (a, b) pairs among rows where both are present.
    pub fn n_unique_pairs(&self, a: usize, b: usize) -> usize {
        self.rows
            .iter()
            .filter_map(|r| match (&r[a], &r[b]) {
                (Some(x), Some(y)) => Some((x.as_str(), y.as_str())),
                _ => None,
            })
            .collect::<HashSet<_>>()
            .len()
    }

    /// Drop rows and columns that contain no values at all. Returns
    /// `(rows_removed, columns_removed)`.
    pub fn drop_empty(&mut self) -> (usize, usize) {
        let before_rows = self.rows.len();
        self.rows.retain(|r| r.iter().any(|c| c.is_some()));
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| self.rows.iter().any(|r| r[i].is_some()))
            .collect();
        let removed_cols = self.columns.len() - keep.len();
        if removed_cols > 0 {
            self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
            for row in self.rows.iter_mut() {
                let kept: Vec<Cell> = keep.iter().map(|&i| row[i].take()).collect();
                *row = kept;
            }
        }
        (before_rows - self.rows.len(), removed_cols)
    }

    /// Names that occur more than once, in first-seen order.
    pub fn duplicated_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dup: Vec<String> = Vec::new();
        for c in &self.columns {
            if !seen.insert(c.as_str()) && !dup.contains(c) {
                dup.push(c.clone());
            }
        }
        dup
    }
}

pub fn infer_kind(values: &[&str]) -> ColumnKind {
    if values.is_empty() {
        return ColumnKind::Empty;
    }
    if values.iter().all(|v| parse_i64_safe(Some(v)).is_some()) {
        return ColumnKind::Integer;
    }
    if values.iter().all(|v| parse_f64_safe(Some(v)).is_some()) {
        return ColumnKind::Float;
    }
    if values
        .iter()
        .all(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false"))
    {
        return ColumnKind::Bool;
    }
    ColumnKind::Text
}
