// Reading invoice exports into a `Table`, and combining several exports.
use crate::error::{OstaError, Result};
use crate::report::{Diagnostics, WarningKind};
use crate::table::{clean_cell, Cell, Table};
use calamine::{open_workbook_auto, Data, DataType, Reader};
use csv::ReaderBuilder;
use encoding_rs::{UTF_8, WINDOWS_1252};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Read a CSV or spreadsheet file. The format is chosen by extension.
pub fn read_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let table = match ext.as_str() {
        "csv" | "txt" => read_csv(path)?,
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_spreadsheet(path)?,
        _ => return Err(OstaError::UnsupportedFormat(path.display().to_string())),
    };
    info!(
        "Loaded {} ({} rows, {} columns)",
        path.display(),
        table.n_rows(),
        table.n_cols()
    );
    Ok(table)
}

/// Decode file bytes as UTF-8, falling back to Windows-1252, which older
/// Finnish exports commonly use.
fn decode(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    debug!("input is not valid UTF-8, decoding as Windows-1252");
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Pick the delimiter that occurs most often on the header line.
pub fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .fold((b',', 0), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0
}

pub fn read_csv_str(text: &str) -> Result<Table> {
    let delimiter = detect_delimiter(text);
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(clean_cell).collect());
    }
    Ok(Table::new(columns, rows))
}

fn read_csv(path: &Path) -> Result<Table> {
    let bytes = fs::read(path)?;
    read_csv_str(&decode(&bytes))
}

fn render_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => None,
        Data::String(s) => clean_cell(s),
        // Whole numbers come back as floats; keep codes like 853 integral.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%d.%m.%Y").to_string())
            .or_else(|| clean_cell(&cell.to_string())),
        other => clean_cell(&other.to_string()),
    }
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let Some(first) = sheet_names.first() else {
        return Err(OstaError::EmptyTable(path.display().to_string()));
    };
    let range = workbook.worksheet_range(first)?;
    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|c| render_cell(c).unwrap_or_default())
            .collect(),
        None => return Err(OstaError::EmptyTable(path.display().to_string())),
    };
    let body = rows.map(|r| r.iter().map(render_cell).collect()).collect();
    Ok(Table::new(columns, body))
}

/// Expand a single directory argument into its regular files, sorted.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if let [single] = inputs {
        if single.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(single)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            return Ok(files);
        }
    }
    Ok(inputs.to_vec())
}

/// Concatenate tables, aligning columns by name. The output columns are
/// the union of all input columns in first-seen order; missing cells are
/// empty.
pub fn concat_tables(tables: Vec<Table>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for t in &tables {
        for c in &t.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }
    let position: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let mut rows = Vec::new();
    for t in tables {
        // Duplicated names inside one file map to the first output slot.
        let targets: Vec<usize> = t.columns.iter().map(|c| position[c.as_str()]).collect();
        for row in t.rows {
            let mut out: Vec<Cell> = vec![None; columns.len()];
            for (v, &target) in row.into_iter().zip(&targets) {
                if out[target].is_none() {
                    out[target] = v;
                }
            }
            rows.push(out);
        }
    }
    Table::new(columns, rows)
}

/// Read and merge several exports into one table.
///
/// `inputs` is either a list of files or a single directory. Files that
/// cannot be opened are skipped with a warning.
pub fn combine_data(inputs: &[PathBuf], diagnostics: &mut Diagnostics) -> Result<Table> {
    let files = expand_inputs(inputs)?;
    if files.is_empty() {
        return Err(OstaError::Config("no input files to combine".to_string()));
    }
    let total = files.len();
    let mut tables = Vec::new();
    for (i, file) in files.iter().enumerate() {
        info!("Combining file {}/{}: {}", i + 1, total, file.display());
        match read_table(file) {
            Ok(t) => tables.push(t),
            Err(e) => diagnostics.push(
                WarningKind::FileNotOpened,
                format!("Failed to open the file {}: {}", file.display(), e),
                vec![vec![file.display().to_string()]],
            ),
        }
    }
    Ok(concat_tables(tables))
}
