use crate::error::Result;
use crate::report::Diagnostics;
use crate::table::Table;
use serde::Serialize;
use std::path::Path;
use tabled::{builder::Builder, settings::Style};

pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Markdown rendering of the first `max_rows` rows of a table.
pub fn render_table(table: &Table, max_rows: usize) -> String {
    if table.is_empty() {
        return "(no rows)".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(table.columns.iter().map(String::as_str));
    for row in table.rows.iter().take(max_rows) {
        builder.push_record(row.iter().map(|c| c.as_deref().unwrap_or("")));
    }
    builder.build().with(Style::markdown()).to_string()
}

/// Markdown rendering of the warning counts.
pub fn render_summary(diagnostics: &Diagnostics) -> String {
    let rows = diagnostics.summary();
    if rows.is_empty() {
        return "(no warnings)".to_string();
    }
    tabled::Table::new(rows).with(Style::markdown()).to_string()
}

pub fn preview_table(title: &str, table: &Table, max_rows: usize) {
    println!("{}", title);
    println!(
        "({} rows, {} columns)\n",
        crate::util::format_int(table.n_rows()),
        table.n_cols()
    );
    println!("{}\n", render_table(table, max_rows));
}

pub fn preview_summary(diagnostics: &Diagnostics) {
    println!("Warnings\n");
    println!("{}\n", render_summary(diagnostics));
}
