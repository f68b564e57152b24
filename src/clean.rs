// Cleaning and standardizing renamed invoice data.
//
// Runs after `change_names`, so every step works on standardized column
// names. Problems in the data are reported, never fatal; only invalid
// options and broken reference tables stop a run.
use crate::change_names::{Amounts, Sum};
use crate::config::Options;
use crate::dates::{check_format, standardize_dates};
use crate::error::{OstaError, Result};
use crate::matching::{check_org_data, standardize_based_on_db, PartyColumns, ORG, SUPPL};
use crate::reference::{available_years, subset_by_year, ReferenceData};
use crate::report::{render_row, Diagnostics, WarningKind};
use crate::table::{Cell, ColumnKind, Table};
use crate::util::{match_key, parse_f64_safe};
use crate::validate::{is_valid_bid, is_valid_vat_number, test_if_voucher};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

pub const ACCOUNT_PAIRS: [(&str, &str); 2] = [("account_number", "number"), ("account_name", "name")];
pub const SERVICE_PAIRS: [(&str, &str); 2] = [("service_cat", "number"), ("service_cat_name", "name")];

/// Clean and standardize `table` in place.
pub fn clean_data(
    table: &mut Table,
    refs: &ReferenceData,
    opts: &Options,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    if table.is_empty() {
        return Err(OstaError::EmptyTable("input".to_string()));
    }
    opts.validate()?;
    check_format(&opts.date_format)?;
    if !opts.disable_country && !refs.land_codes.has_column(&opts.country_format) {
        return Err(OstaError::Config(format!(
            "'country_format' must be one of the following options: {:?}",
            refs.land_codes.columns
        )));
    }
    info!(
        "Cleaning {} rows and {} columns",
        crate::util::format_int(table.n_rows()),
        table.n_cols()
    );

    remove_empty(table, diagnostics);
    if !opts.disable_voucher {
        check_voucher(table, diagnostics);
    }
    if !opts.disable_vat_number {
        check_vat_numbers(table, refs, diagnostics);
    }
    let mut years_in_data = BTreeSet::new();
    if !opts.disable_date {
        years_in_data = standardize_date(table, opts, diagnostics)?;
    }
    if !opts.disable_org {
        standardize_party(table, &refs.municipalities, &ORG, opts, "org", diagnostics);
        check_org_data(table, &ORG, diagnostics);
    }
    if !opts.disable_suppl {
        if let Some(suppliers) = &refs.suppliers {
            standardize_party(table, suppliers, &SUPPL, opts, "suppl", diagnostics);
        }
        check_org_data(table, &SUPPL, diagnostics);
    }
    if !opts.disable_account {
        let db = coded_subset(&refs.accounts, opts, &years_in_data)?;
        standardize_coded(table, &db, &ACCOUNT_PAIRS, opts, "account", diagnostics);
    }
    if !opts.disable_service {
        let db = coded_subset(&refs.services, opts, &years_in_data)?;
        standardize_coded(table, &db, &SERVICE_PAIRS, opts, "service", diagnostics);
    }
    if !opts.disable_country {
        standardize_country(table, refs, &opts.country_format, diagnostics);
    }
    if !opts.disable_sums {
        check_sums(table, diagnostics);
    }
    Ok(())
}

/// Of the given columns, those present exactly once. Duplicated ones are
/// reported and left out.
pub fn not_duplicated_columns<'a>(
    table: &Table,
    columns: &[&'a str],
    diagnostics: &mut Diagnostics,
) -> Vec<&'a str> {
    let dup = table.duplicated_columns();
    let skipped: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| dup.iter().any(|d| d == c))
        .collect();
    if !skipped.is_empty() {
        diagnostics.push(
            WarningKind::DuplicatedColumns,
            format!(
                "The following columns are duplicated and were not checked: {:?}",
                skipped
            ),
            skipped.iter().map(|c| vec![c.to_string()]).collect(),
        );
    }
    columns
        .iter()
        .copied()
        .filter(|c| table.has_column(c) && !skipped.contains(c))
        .collect()
}

fn remove_empty(table: &mut Table, diagnostics: &mut Diagnostics) {
    let (rows, cols) = table.drop_empty();
    if rows > 0 || cols > 0 {
        diagnostics.push(
            WarningKind::EmptyRemoved,
            format!("{} empty rows and {} empty columns were removed.", rows, cols),
            vec![],
        );
    }
}

fn check_voucher(table: &Table, diagnostics: &mut Diagnostics) {
    let cols = not_duplicated_columns(table, &["voucher"], diagnostics);
    let Some(idx) = cols.first().and_then(|c| table.col_index(c)) else {
        return;
    };
    if !test_if_voucher(&table.values(idx)) {
        diagnostics.push(
            WarningKind::InvalidVoucher,
            "The 'voucher' column does not seem to contain vouchers. Please check it for errors.",
            vec![],
        );
    }
}

/// Two-character country code for a raw country value, looked up over
/// every land-code column.
fn country_code(refs: &ReferenceData, value: &str) -> Option<String> {
    let land = &refs.land_codes;
    let code_idx = land.col_index("code_2char")?;
    let key = match_key(value);
    land.rows.iter().find_map(|row| {
        let hit = row.iter().flatten().any(|v| match_key(v) == key);
        if hit {
            row[code_idx].clone()
        } else {
            None
        }
    })
}

fn check_vat_numbers(table: &Table, refs: &ReferenceData, diagnostics: &mut Diagnostics) {
    // (VAT column, business-ID column); municipalities are Finnish.
    let checks = [
        ("vat_number", "suppl_id", None),
        ("suppl_vat_number", "suppl_id", None),
        ("org_vat_number", "org_id", Some("FI")),
    ];
    let vat_cols: Vec<&str> = checks.iter().map(|c| c.0).collect();
    let present = not_duplicated_columns(table, &vat_cols, diagnostics);
    let country_idx = table.col_index("country");

    for (vat_col, bid_col, fixed_country) in checks {
        if !present.contains(&vat_col) {
            continue;
        }
        let Some(vi) = table.col_index(vat_col) else { continue };
        let bi = table.col_index(bid_col);
        let mut bad: Vec<Vec<String>> = Vec::new();
        for row in &table.rows {
            let Some(vat) = row[vi].as_deref() else { continue };
            if !is_valid_vat_number(vat) {
                bad.push(vec![vat.to_string(), "invalid pattern".to_string()]);
                continue;
            }
            let bid = bi.and_then(|b| row[b].as_deref()).filter(|b| is_valid_bid(b));
            let country = match fixed_country {
                Some(c) => Some(c.to_string()),
                None => country_idx
                    .and_then(|c| row[c].as_deref())
                    .and_then(|c| country_code(refs, c)),
            };
            if let (Some(bid), Some(country)) = (bid, country) {
                let expected = format!("{}{}", country, bid.replace('-', ""));
                let compact: String = vat.split_whitespace().collect();
                if !compact.eq_ignore_ascii_case(&expected) {
                    bad.push(vec![vat.to_string(), format!("expected {}", expected)]);
                }
            }
        }
        if !bad.is_empty() {
            bad.sort();
            bad.dedup();
            diagnostics.push(
                WarningKind::InvalidVatNumber,
                format!(
                    "The following values of '{}' are not valid VAT numbers. Please check them for errors.",
                    vat_col
                ),
                bad,
            );
        }
    }
}

/// Rewrite the `date` column in `opts.date_format`. Returns the years of
/// the parsed dates.
fn standardize_date(
    table: &mut Table,
    opts: &Options,
    diagnostics: &mut Diagnostics,
) -> Result<BTreeSet<i32>> {
    let cols = not_duplicated_columns(table, &["date"], diagnostics);
    let Some(idx) = cols.first().and_then(|c| table.col_index(c)) else {
        return Ok(BTreeSet::new());
    };
    let outcome = standardize_dates(&table.column(idx), &opts.date_format, opts.dayfirst, opts.yearfirst)?;
    for (row, value) in outcome.values.into_iter().enumerate() {
        table.set(row, idx, value);
    }
    if !outcome.failed.is_empty() {
        diagnostics.push(
            WarningKind::DateNotDetected,
            format!(
                "The format of {} dates was not detected and they were left unchanged. \
                 Please check that dates have separators between days, months and years.",
                outcome.failed.len()
            ),
            outcome.failed.into_iter().map(|v| vec![v]).collect(),
        );
    }
    debug!("dates span years {:?}", outcome.years);
    Ok(outcome.years)
}

fn usable_pairs<'a>(
    table: &Table,
    pairs: &[(&'a str, &'a str)],
    diagnostics: &mut Diagnostics,
) -> Vec<(&'a str, &'a str)> {
    let cols: Vec<&str> = pairs.iter().map(|p| p.0).collect();
    let ok = not_duplicated_columns(table, &cols, diagnostics);
    pairs.iter().copied().filter(|p| ok.contains(&p.0)).collect()
}

fn standardize_party(
    table: &mut Table,
    db: &Table,
    party: &PartyColumns,
    opts: &Options,
    label: &str,
    diagnostics: &mut Diagnostics,
) {
    let pairs = usable_pairs(table, &party.lookup_pairs(), diagnostics);
    if pairs.is_empty() {
        return;
    }
    standardize_based_on_db(table, db, &pairs, opts.db_pattern_th, label, diagnostics);
}

/// Account or service table restricted to the years of interest: the
/// configured `db_year`, else the years found in the data, else all.
pub fn coded_subset(db: &Table, opts: &Options, years_in_data: &BTreeSet<i32>) -> Result<Table> {
    if let Some(years) = &opts.db_year {
        return subset_by_year(db, years);
    }
    let available = available_years(db);
    let years: Vec<i64> = years_in_data
        .iter()
        .map(|&y| i64::from(y))
        .filter(|y| available.contains(y))
        .collect();
    subset_by_year(db, &years)
}

fn standardize_coded(
    table: &mut Table,
    db: &Table,
    pairs: &[(&str, &str)],
    opts: &Options,
    label: &str,
    diagnostics: &mut Diagnostics,
) {
    let pairs = usable_pairs(table, pairs, diagnostics);
    if pairs.is_empty() {
        return;
    }
    standardize_based_on_db(table, db, &pairs, opts.db_pattern_th, label, diagnostics);

    let mut wrong = Vec::new();
    for &(col, db_col) in &pairs {
        let want = if db_col == "number" {
            ColumnKind::Integer
        } else {
            ColumnKind::Text
        };
        let Some(idx) = table.col_index(col) else { continue };
        let kind = table.kind(idx);
        if kind != want && kind != ColumnKind::Empty {
            wrong.push(vec![col.to_string(), kind.as_str().to_string(), want.as_str().to_string()]);
        }
    }
    if !wrong.is_empty() {
        let cols: Vec<&str> = wrong.iter().map(|w| w[0].as_str()).collect();
        diagnostics.push(
            WarningKind::IncorrectDataType,
            format!("{}: the following columns have an incorrect data type: {:?}", label, cols),
            wrong,
        );
    }
}

fn standardize_country(
    table: &mut Table,
    refs: &ReferenceData,
    country_format: &str,
    diagnostics: &mut Diagnostics,
) {
    let cols = not_duplicated_columns(table, &["country"], diagnostics);
    let Some(idx) = cols.first().and_then(|c| table.col_index(c)) else {
        return;
    };
    let land = &refs.land_codes;
    let Some(target) = land.col_index(country_format) else {
        return;
    };
    let mut lookup: HashMap<String, Cell> = HashMap::new();
    for row in &land.rows {
        for v in row.iter().flatten() {
            lookup.entry(match_key(v)).or_insert_with(|| row[target].clone());
        }
    }
    let mut missing: Vec<String> = Vec::new();
    for r in 0..table.n_rows() {
        let Some(v) = table.get(r, idx) else { continue };
        match lookup.get(&match_key(v)) {
            Some(Some(code)) => {
                let code = code.clone();
                table.set(r, idx, Some(code));
            }
            _ => {
                if !missing.iter().any(|m| m == v) {
                    missing.push(v.to_string());
                }
            }
        }
    }
    if !missing.is_empty() {
        diagnostics.push(
            WarningKind::CountryNotDetected,
            format!(
                "The following countries were not detected and were left unchanged: {:?}",
                missing
            ),
            missing.into_iter().map(|m| vec![m]).collect(),
        );
    }
}

/// Convert the amount columns to plain decimal numbers and check that
/// they add up.
fn check_sums(table: &mut Table, diagnostics: &mut Diagnostics) {
    let names: Vec<&str> = Sum::ALL.iter().map(|s| s.name()).collect();
    let present = not_duplicated_columns(table, &names, diagnostics);
    let mut numeric: Vec<Sum> = Vec::new();
    for sum in Sum::ALL {
        if !present.contains(&sum.name()) {
            continue;
        }
        let Some(idx) = table.col_index(sum.name()) else { continue };
        let bad: Vec<String> = table
            .values(idx)
            .into_iter()
            .filter(|v| parse_f64_safe(Some(v)).is_none())
            .map(str::to_string)
            .collect();
        if !bad.is_empty() {
            diagnostics.push(
                WarningKind::SumNotNumeric,
                format!(
                    "'{}' could not be converted to numbers and was left unchanged.",
                    sum.name()
                ),
                bad.into_iter().map(|v| vec![v]).collect(),
            );
            continue;
        }
        for r in 0..table.n_rows() {
            let v = parse_f64_safe(table.get(r, idx)).map(|f| f.to_string());
            table.set(r, idx, v);
        }
        numeric.push(sum);
    }
    if numeric.len() < 3 {
        return;
    }

    let idx: Vec<(Sum, usize)> = Sum::ALL
        .iter()
        .filter_map(|&s| table.col_index(s.name()).map(|i| (s, i)))
        .collect();
    let mut mismatched: Vec<Vec<String>> = Vec::new();
    for row in &table.rows {
        let mut amounts = Amounts::default();
        let mut complete = true;
        for &(sum, i) in &idx {
            match parse_f64_safe(row[i].as_deref()) {
                Some(v) => amounts.set(sum, v),
                None => complete = false,
            }
        }
        if complete && !amounts.consistent() {
            let cells: Vec<Cell> = idx.iter().map(|&(_, i)| row[i].clone()).collect();
            let rendered = render_row(&cells);
            if !mismatched.contains(&rendered) {
                mismatched.push(rendered);
            }
        }
    }
    if !mismatched.is_empty() {
        diagnostics.push(
            WarningKind::SumMismatch,
            format!(
                "The sums of {} rows do not match (total, vat_amount, price_ex_vat). \
                 Please check them for errors.",
                mismatched.len()
            ),
            mismatched,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> ReferenceData {
        ReferenceData::bundled().unwrap()
    }

    fn clean(table: &mut Table, opts: &Options) -> Diagnostics {
        let mut d = Diagnostics::new();
        clean_data(table, &refs(), opts, &mut d).unwrap();
        d
    }

    #[test]
    fn empty_table_is_an_error() {
        let mut t = Table::from_str_rows(&["total"], &[]);
        let err = clean_data(&mut t, &refs(), &Options::default(), &mut Diagnostics::new());
        assert!(matches!(err, Err(OstaError::EmptyTable(_))));
    }

    #[test]
    fn unknown_country_format_is_an_error() {
        let mut t = Table::from_str_rows(&["country"], &[vec!["FI"]]);
        let opts = Options {
            country_format: "flag".to_string(),
            ..Options::default()
        };
        let err = clean_data(&mut t, &refs(), &opts, &mut Diagnostics::new());
        assert!(matches!(err, Err(OstaError::Config(_))));
    }

    #[test]
    fn removes_empty_rows_and_columns() {
        let mut t = Table::from_str_rows(&["total", "x"], &[vec!["1", ""], vec!["", ""]]);
        let d = clean(&mut t, &Options::default());
        assert_eq!(t.columns, vec!["total"]);
        assert_eq!(t.n_rows(), 1);
        assert!(d.has(WarningKind::EmptyRemoved));
    }

    #[test]
    fn standardizes_dates_and_countries() {
        let mut t = Table::from_str_rows(
            &["date", "country"],
            &[vec!["1.2.2023", "Suomi"], vec!["15.2.2023", "fin"], vec!["16.2.2023", "Atlantis"]],
        );
        let opts = Options {
            date_format: "%Y-%m-%d".to_string(),
            ..Options::default()
        };
        let d = clean(&mut t, &opts);
        assert_eq!(t.get(0, 0), Some("2023-02-01"));
        assert_eq!(t.get(1, 0), Some("2023-02-15"));
        assert_eq!(t.get(0, 1), Some("FI"));
        assert_eq!(t.get(1, 1), Some("FI"));
        assert_eq!(t.get(2, 1), Some("Atlantis"));
        assert!(d.has(WarningKind::CountryNotDetected));
        assert!(!d.has(WarningKind::DateNotDetected));
    }

    #[test]
    fn standardizes_org_data() {
        let mut t = Table::from_str_rows(
            &["org_number", "org_name", "total"],
            &[vec!["91", "helsinki", "1"], vec!["853", "Turun", "2"]],
        );
        let d = clean(&mut t, &Options::default());
        assert_eq!(t.get(0, 0), Some("091"));
        assert_eq!(t.get(0, 1), Some("Helsinki"));
        assert!(d.has(WarningKind::DataMismatch));
    }

    #[test]
    fn checks_vat_numbers_against_business_ids() {
        let mut t = Table::from_str_rows(
            &["suppl_id", "vat_number", "country"],
            &[
                vec!["0135202-4", "FI01352024", "FI"],
                vec!["0204819-8", "FI01352024", "FI"],
                vec!["0101263-6", "XX123", "FI"],
            ],
        );
        let d = clean(&mut t, &Options::default());
        let w = d.of_kind(WarningKind::InvalidVatNumber).next().unwrap();
        assert_eq!(w.rows.len(), 2);
    }

    #[test]
    fn warns_on_bad_vouchers() {
        let mut t = Table::from_str_rows(&["voucher"], &[vec!["same"], vec!["same"], vec!["same"]]);
        let d = clean(&mut t, &Options::default());
        assert!(d.has(WarningKind::InvalidVoucher));

        let mut t = Table::from_str_rows(&["voucher"], &[vec!["A-1"], vec!["A-2"], vec!["A-3"]]);
        let d = clean(&mut t, &Options::default());
        assert!(!d.has(WarningKind::InvalidVoucher));
    }

    #[test]
    fn converts_and_checks_sums() {
        let mut t = Table::from_str_rows(
            &["total", "vat_amount", "price_ex_vat"],
            &[vec!["12,40", "2,40", "10"], vec!["1 000,00", "240", "700"]],
        );
        let d = clean(&mut t, &Options::default());
        assert_eq!(t.get(0, 0), Some("12.4"));
        assert_eq!(t.get(1, 0), Some("1000"));
        let w = d.of_kind(WarningKind::SumMismatch).next().unwrap();
        assert_eq!(w.rows, vec![vec!["1000".to_string(), "240".to_string(), "700".to_string()]]);

        let mut t = Table::from_str_rows(&["total"], &[vec!["12 eur"]]);
        let d = clean(&mut t, &Options::default());
        assert!(d.has(WarningKind::SumNotNumeric));
        assert_eq!(t.get(0, 0), Some("12 eur"));
    }

    #[test]
    fn flags_wrong_account_types() {
        let mut t = Table::from_str_rows(
            &["account_number", "account_name"],
            &[vec!["4400", "Muiden palvelujen ostot"], vec!["abc", "Vuokrat"]],
        );
        let opts = Options {
            db_year: Some(vec![2022]),
            ..Options::default()
        };
        let d = clean(&mut t, &opts);
        assert!(d.has(WarningKind::IncorrectDataType));
    }

    #[test]
    fn skips_duplicated_columns() {
        let mut t = Table::from_str_rows(&["date", "date"], &[vec!["1.2.2023", "2.2.2023"]]);
        let d = clean(&mut t, &Options::default());
        assert!(d.has(WarningKind::DuplicatedColumns));
        assert_eq!(t.get(0, 0), Some("1.2.2023"));
    }

    #[test]
    fn disabled_steps_do_nothing() {
        let mut t = Table::from_str_rows(&["date", "country"], &[vec!["1.2.2023", "Suomi"]]);
        let opts = Options {
            disable_date: true,
            disable_country: true,
            ..Options::default()
        };
        let d = clean(&mut t, &opts);
        assert_eq!(t.get(0, 0), Some("1.2.2023"));
        assert_eq!(t.get(0, 1), Some("Suomi"));
        assert!(d.is_empty());
    }
}
