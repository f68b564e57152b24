// Enriching cleaned invoice data from the reference tables.
use crate::change_names::{Amounts, Sum};
use crate::clean::{coded_subset, ACCOUNT_PAIRS, SERVICE_PAIRS};
use crate::config::Options;
use crate::error::{OstaError, Result};
use crate::matching::{ORG, SUPPL};
use crate::reference::{require_columns, ReferenceData};
use crate::report::{Diagnostics, WarningKind};
use crate::table::{Cell, Table};
use crate::util::{format_amount, match_key, parse_f64_safe};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Reference columns that describe the table itself rather than the
/// looked-up entity.
const SKIPPED_DB_COLUMNS: [&str; 1] = ["year"];

/// Add columns to `table` from the reference data.
pub fn enrich_data(
    table: &mut Table,
    refs: &ReferenceData,
    opts: &Options,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    if table.is_empty() {
        return Err(OstaError::EmptyTable("input".to_string()));
    }
    opts.validate()?;

    if !opts.disable_org {
        add_data_from_db(table, &refs.municipalities, &ORG.join_pairs(), "org", diagnostics);
    }
    if !opts.disable_suppl {
        if let Some(suppliers) = &refs.suppliers {
            add_data_from_db(table, suppliers, &SUPPL.join_pairs(), "suppl", diagnostics);
        }
    }
    let years = years_in_dates(table, &opts.date_format);
    if !opts.disable_account {
        let mut db = coded_subset(&refs.accounts, opts, &years)?;
        if let Some(subset) = &opts.subset_account_data {
            db = filter_on(db, "cat_1", subset)?;
        }
        add_data_from_db(table, &db, &ACCOUNT_PAIRS, "account", diagnostics);
    }
    if !opts.disable_service {
        let db = coded_subset(&refs.services, opts, &years)?;
        add_data_from_db(table, &db, &SERVICE_PAIRS, "service", diagnostics);
    }
    if !opts.disable_sums {
        add_missing_sum(table);
    }
    Ok(())
}

/// Years of the dates in `table`, read in the format cleaning wrote them.
fn years_in_dates(table: &Table, date_format: &str) -> BTreeSet<i32> {
    let Some(idx) = table.col_index("date") else {
        return BTreeSet::new();
    };
    table
        .values(idx)
        .into_iter()
        .filter_map(|v| NaiveDate::parse_from_str(v, date_format).ok())
        .map(|d| d.year())
        .collect()
}

fn filter_on(mut db: Table, column: &str, value: &str) -> Result<Table> {
    require_columns(&db, "account_data", &[column])?;
    if let Some(idx) = db.col_index(column) {
        db.rows.retain(|r| r[idx].as_deref() == Some(value));
    }
    Ok(db)
}

/// Left join `db` onto `table`.
///
/// The first of `pairs` present on both sides is the join key; keys match
/// numerically when both are integers, otherwise case-insensitively.
/// Every other db column is appended as `{prefix}_{column}` unless the
/// table already carries it. Returns the names of the added columns.
///
/// A table without any of the key columns is left alone; a db without the
/// matching ones is reported as `NoMatchingColumns`.
pub fn add_data_from_db(
    table: &mut Table,
    db: &Table,
    pairs: &[(&str, &str)],
    prefix: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<String> {
    if !pairs.iter().any(|(t, _)| table.has_column(t)) {
        debug!("{}: no key columns in the data", prefix);
        return Vec::new();
    }
    let Some((t_key, d_key)) = pairs
        .iter()
        .find_map(|(t, d)| Some((table.col_index(t)?, db.col_index(d)?)))
    else {
        let expected: Vec<&str> = pairs.iter().map(|(_, d)| *d).collect();
        diagnostics.push(
            WarningKind::NoMatchingColumns,
            format!(
                "'{}_data' should include at least one of the following columns: {:?}",
                prefix, expected
            ),
            vec![],
        );
        return Vec::new();
    };

    // Db columns already represented in the table are not added again.
    let matched: Vec<&str> = pairs
        .iter()
        .filter(|(t, _)| table.has_column(t))
        .map(|(_, d)| *d)
        .collect();
    let added: Vec<(usize, String)> = db
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !matched.contains(&c.as_str()) && !SKIPPED_DB_COLUMNS.contains(&c.as_str()))
        .map(|(i, c)| (i, format!("{}_{}", prefix, c)))
        .filter(|(_, name)| !table.has_column(name))
        .collect();
    if added.is_empty() {
        return Vec::new();
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    for (r, row) in db.rows.iter().enumerate() {
        if let Some(k) = &row[d_key] {
            index.entry(match_key(k)).or_insert(r);
        }
    }

    let hits: Vec<Option<usize>> = table
        .rows
        .iter()
        .map(|row| row[t_key].as_deref().and_then(|k| index.get(&match_key(k)).copied()))
        .collect();
    let unmatched = hits.iter().filter(|h| h.is_none()).count();
    for (i, name) in &added {
        let values: Vec<Cell> = hits.iter().map(|h| h.and_then(|r| db.rows[r][*i].clone())).collect();
        table.push_column(name, values);
    }
    info!(
        "{}: added {} columns on '{}', {} rows without a match",
        prefix,
        added.len(),
        table.columns[t_key],
        unmatched
    );
    added.into_iter().map(|(_, name)| name).collect()
}

/// Compute the one amount column that is missing when the other two are
/// present and numeric. Returns the computed column.
pub fn add_missing_sum(table: &mut Table) -> Option<Sum> {
    let missing: Vec<Sum> = Sum::ALL
        .iter()
        .copied()
        .filter(|s| !table.has_column(s.name()))
        .collect();
    let &[target] = missing.as_slice() else {
        return None;
    };
    let others: Vec<(Sum, usize)> = target
        .others()
        .iter()
        .filter_map(|&s| table.col_index(s.name()).map(|i| (s, i)))
        .collect();
    let numeric = others.iter().all(|&(_, i)| {
        table
            .values(i)
            .into_iter()
            .all(|v| parse_f64_safe(Some(v)).is_some())
    });
    if !numeric {
        debug!("'{}' not computed: amounts are not numeric", target.name());
        return None;
    }
    let values: Vec<Cell> = table
        .rows
        .iter()
        .map(|row| {
            let mut amounts = Amounts::default();
            for &(sum, i) in &others {
                amounts.set(sum, parse_f64_safe(row[i].as_deref())?);
            }
            Some(format_amount(amounts.derive(target)))
        })
        .collect();
    table.push_column(target.name(), values);
    info!("computed '{}' from the other amounts", target.name());
    Some(target)
}
