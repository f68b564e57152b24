// Column-name standardization.
//
// Raw exports name their columns freely ("Kunnan nimi", "Summa.",
// "Test3"). This module maps them onto the fixed schema used by the
// cleaning and enrichment steps: first by exact dictionary lookup, then,
// for the leftovers, by a chain of heuristics over the column contents,
// and finally by fuzzy matching the name itself.

use crate::config::Options;
use crate::error::{OstaError, Result};
use crate::fuzzy::{extract_one, token_sort_ratio};
use crate::reference::{Fields, ReferenceData};
use crate::report::{Diagnostics, WarningKind};
use crate::table::{ColumnKind, Table};
use crate::util::{is_digits, match_key, parse_f64_safe};
use crate::validate::{is_valid_bid, is_valid_vat_number, share, test_if_date, test_if_voucher};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Name matches tried before any content heuristic must be at least this
/// strong.
const STRICT_PATTERN_TH: f64 = 0.95;

/// Absolute tolerance for `total = price_ex_vat + vat_amount`.
const SUM_TOLERANCE: f64 = 0.005;

/// Rename the columns of `table` into the standardized schema.
///
/// Columns without an exact dictionary match are guessed when
/// `opts.guess_names` is set. Guessed, undetected and duplicated names are
/// reported through `diagnostics`.
pub fn change_names(
    table: &mut Table,
    refs: &ReferenceData,
    opts: &Options,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    if table.is_empty() {
        return Err(OstaError::EmptyTable("input".to_string()));
    }
    opts.validate()?;

    let mut colnames: Vec<String> = Vec::with_capacity(table.n_cols());
    let mut not_found: Vec<usize> = Vec::new();
    for (i, col) in table.columns.iter().enumerate() {
        match refs.fields.get(col) {
            Some(name) => colnames.push(name.to_string()),
            None => {
                colnames.push(col.clone());
                not_found.push(i);
            }
        }
    }

    if opts.guess_names && !not_found.is_empty() {
        let mut renamed: Vec<Vec<String>> = Vec::new();
        let mut still_missing = Vec::new();
        for &i in &not_found {
            let name = Guesser {
                table,
                colnames: &colnames,
                refs,
                opts,
            }
            .guess(i);
            if name != table.columns[i] {
                debug!("guessed '{}' -> '{}'", table.columns[i], name);
                renamed.push(vec![table.columns[i].clone(), name.clone()]);
                // Later guesses see this one.
                colnames[i] = name;
            } else {
                still_missing.push(i);
            }
        }
        if !renamed.is_empty() {
            let old: Vec<&str> = renamed.iter().map(|r| r[0].as_str()).collect();
            let new: Vec<&str> = renamed.iter().map(|r| r[1].as_str()).collect();
            let message = format!(
                "The following column names were guessed: {:?} were replaced with {:?}",
                old, new
            );
            diagnostics.push(WarningKind::ColumnsRenamed, message, renamed.clone());
        }
        not_found = still_missing;
    }

    if !not_found.is_empty() {
        let names: Vec<String> = not_found.iter().map(|&i| table.columns[i].clone()).collect();
        diagnostics.push(
            WarningKind::ColumnsNotDetected,
            format!(
                "The following column names were not detected. Please check them for errors: {:?}",
                names
            ),
            names.iter().map(|n| vec![n.clone()]).collect(),
        );
    }

    table.columns = colnames;
    if opts.make_unique && !table.duplicated_columns().is_empty() {
        make_unique(table, diagnostics);
    }
    Ok(())
}

/// Suffix repeated names with `_2`, `_3`, ... in order of appearance.
fn make_unique(table: &mut Table, diagnostics: &mut Diagnostics) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut changed: Vec<Vec<String>> = Vec::new();
    let mut columns = Vec::with_capacity(table.n_cols());
    for col in &table.columns {
        let n = counts.entry(col.clone()).or_insert(0);
        *n += 1;
        if *n == 1 {
            columns.push(col.clone());
        } else {
            let renamed = format!("{}_{}", col, n);
            changed.push(vec![col.clone(), renamed.clone()]);
            columns.push(renamed);
        }
    }
    table.columns = columns;
    let new: Vec<&str> = changed.iter().map(|c| c[1].as_str()).collect();
    let message = format!("Duplicated column names were made unique: {:?}", new);
    diagnostics.push(WarningKind::DuplicatedColumns, message, changed);
}

/// Fuzzy match a raw column name against the dictionary keys. Returns the
/// standardized name of the best key scoring at least `pattern_th`, or
/// `col` unchanged.
pub fn loose_match(col: &str, fields: &Fields, pattern_th: f64) -> String {
    match extract_one(col, fields.keys(), token_sort_ratio) {
        Some((key, score)) if score >= pattern_th * 100.0 => fields
            .get(key)
            .map(str::to_string)
            .unwrap_or_else(|| col.to_string()),
        _ => col.to_string(),
    }
}

/// What the values of a column must look like for a reference lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Integer codes.
    Number,
    /// Non-numeric text.
    Text,
    /// Anything; business IDs.
    Any,
}

struct Guesser<'a> {
    table: &'a Table,
    colnames: &'a [String],
    refs: &'a ReferenceData,
    opts: &'a Options,
}

impl Guesser<'_> {
    /// Run the guesses in order; the first that fires names the column.
    fn guess(&self, i: usize) -> String {
        let col = self.table.columns[i].as_str();
        let opts = self.opts;
        let refs = self.refs;

        let strict = loose_match(col, &refs.fields, opts.pattern_th.max(STRICT_PATTERN_TH));
        if strict != col {
            return strict;
        }
        if self.test_if_bid(i) {
            return self.org_or_suppl_bid(i).to_string();
        }
        if test_if_date(&self.table.values(i)) {
            return "date".to_string();
        }
        let land_columns: Vec<&str> = refs
            .land_codes
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != "code_num")
            .collect();
        let country = Lookup::new(Shape::Text, &refs.land_codes, &land_columns);
        if self.test_if_in_db(i, &country, opts.country_th(), &[], &[]) {
            return "country".to_string();
        }
        if self.test_if_vat_number(i) {
            return "vat_number".to_string();
        }
        let org_name = Lookup::new(Shape::Text, &refs.municipalities, &["name"]);
        if self.test_if_in_db(
            i,
            &org_name,
            opts.match_th,
            &["suppl_name", "suppl_number"],
            &["org_number", "org_id"],
        ) {
            return "org_name".to_string();
        }

        let account_cols = ["account_number", "account_name"];
        let service_cols = ["service_cat", "service_cat_name"];
        let coded = [
            ("service_cat", Lookup::new(Shape::Number, &refs.services, &["number"]), &account_cols),
            ("service_cat_name", Lookup::new(Shape::Text, &refs.services, &["name"]), &account_cols),
            ("account_number", Lookup::new(Shape::Number, &refs.accounts, &["number"]), &service_cols),
            ("account_name", Lookup::new(Shape::Text, &refs.accounts, &["name"]), &service_cols),
        ];
        for (name, lookup, excluded) in coded {
            if self.test_if_in_db(i, &lookup, opts.match_th, excluded, &[]) {
                return name.to_string();
            }
        }

        if self.pairs_with_any(i, &["org_name", "org_id"], Some(ColumnKind::Integer)) {
            return "org_number".to_string();
        }
        if self.pairs_with_any(i, &["suppl_id"], Some(ColumnKind::Text)) {
            return "suppl_name".to_string();
        }
        for target in [Sum::PriceExVat, Sum::Total, Sum::VatAmount] {
            if self.test_if_sums(i, target) {
                return target.name().to_string();
            }
        }
        if test_if_voucher(&self.table.values(i)) {
            return "voucher".to_string();
        }
        loose_match(col, &refs.fields, opts.pattern_th)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.colnames.iter().position(|c| c == name)
    }

    fn has(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Does column `i` pair one-to-one with any of the named columns?
    /// With `kind` given, column `i` must also be of that kind.
    fn pairs_with_any(&self, i: usize, names: &[&str], kind: Option<ColumnKind>) -> bool {
        if kind.is_some_and(|k| self.table.kind(i) != k) {
            return false;
        }
        names.iter().any(|name| match self.index_of(name) {
            Some(j) if j != i => {
                let n_other = self.table.n_unique(j);
                n_other > 0 && self.table.n_unique_pairs(i, j) == n_other
            }
            _ => false,
        })
    }

    fn test_if_bid(&self, i: usize) -> bool {
        let values = self.table.values(i);
        let found = share(&values, self.table.n_rows(), |v| v.len() == 9 && is_valid_bid(v));
        found > 0.0 && found >= self.opts.bid_th()
    }

    /// Decide whether a business-ID column identifies the buying
    /// organization or the supplier.
    fn org_or_suppl_bid(&self, i: usize) -> &'static str {
        let known = Lookup::new(Shape::Any, &self.refs.municipalities, &["bid"]);
        if self.test_if_in_db(i, &known, self.opts.bid_th(), &[], &[]) {
            return "org_id";
        }
        let mut res = "suppl_id";
        if self.pairs_with_any(i, &["org_number", "org_name"], None) {
            res = "org_id";
        }
        let identifiers = ["org_number", "org_name", "org_id", "suppl_name", "suppl_id"];
        if identifiers.iter().all(|n| !self.has(n)) {
            res = "bid";
        }
        let column = self.table.column(i);
        if let Some(s) = self.index_of("suppl_id") {
            let other = self.table.column(s);
            if column.iter().zip(&other).all(|(a, b)| a != b) {
                res = "org_id";
            }
        }
        if let Some(o) = self.index_of("org_id") {
            let other = self.table.column(o);
            if column.iter().zip(&other).all(|(a, b)| a == b) {
                res = "org_id";
            }
        }
        let n_rows = self.table.n_rows();
        if n_rows > 0 && (self.table.n_unique(i) as f64) / (n_rows as f64) < 0.5 {
            res = "org_id";
        }
        res
    }

    fn test_if_vat_number(&self, i: usize) -> bool {
        let values = self.table.values(i);
        let found = share(&values, self.table.n_rows(), is_valid_vat_number);
        found > 0.0 && found >= self.opts.match_th
    }

    /// Are at least `threshold` of the values of column `i` found through
    /// `lookup`? Pairing with a `cols_not_match` column vetoes the guess;
    /// pairing with a `cols_to_match` column accepts it without a lookup.
    fn test_if_in_db(
        &self,
        i: usize,
        lookup: &Lookup<'_>,
        threshold: f64,
        cols_not_match: &[&str],
        cols_to_match: &[&str],
    ) -> bool {
        let kind = match lookup.shape {
            Shape::Number => Some(ColumnKind::Integer),
            Shape::Text => Some(ColumnKind::Text),
            Shape::Any => None,
        };
        if self.pairs_with_any(i, cols_not_match, kind) {
            return false;
        }
        if self.pairs_with_any(i, cols_to_match, kind) {
            return true;
        }

        let values = self.table.values(i);
        let shape_ok = match lookup.shape {
            Shape::Number => self.table.kind(i) == ColumnKind::Integer,
            Shape::Text => {
                self.table.kind(i) == ColumnKind::Text && values.iter().all(|v| !is_digits(v))
            }
            Shape::Any => true,
        };
        if !shape_ok || values.is_empty() {
            return false;
        }
        let known = lookup.keys();
        let hits = values.iter().filter(|v| known.contains(&match_key(v))).count();
        hits as f64 / values.len() as f64 >= threshold
    }

    /// Does column `i` complete `total = price_ex_vat + vat_amount` when
    /// taken as `target`? Both other amount columns must already be named.
    fn test_if_sums(&self, i: usize, target: Sum) -> bool {
        let others = target.others();
        let (Some(a), Some(b)) = (self.index_of(others[0].name()), self.index_of(others[1].name()))
        else {
            return false;
        };
        if [i, a, b].iter().any(|&c| !self.table.kind(c).is_numeric()) {
            return false;
        }
        let mut checked = 0usize;
        for row in 0..self.table.n_rows() {
            let value = |c: usize| parse_f64_safe(self.table.get(row, c));
            let (Some(x), Some(va), Some(vb)) = (value(i), value(a), value(b)) else {
                continue;
            };
            let amounts = Amounts::from_parts([(target, x), (others[0], va), (others[1], vb)]);
            if !amounts.consistent() {
                return false;
            }
            checked += 1;
        }
        checked > 0
    }
}

/// Reference columns searched by a content guess.
struct Lookup<'a> {
    shape: Shape,
    db: &'a Table,
    columns: Vec<&'a str>,
}

impl<'a> Lookup<'a> {
    fn new(shape: Shape, db: &'a Table, columns: &[&'a str]) -> Self {
        Lookup {
            shape,
            db,
            columns: columns.to_vec(),
        }
    }

    fn keys(&self) -> HashSet<String> {
        self.columns
            .iter()
            .filter_map(|c| self.db.col_index(c))
            .flat_map(|idx| self.db.values(idx).into_iter().map(match_key))
            .collect()
    }
}

/// The three amount columns of an invoice row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sum {
    Total,
    PriceExVat,
    VatAmount,
}

impl Sum {
    pub const ALL: [Sum; 3] = [Sum::Total, Sum::VatAmount, Sum::PriceExVat];

    pub fn name(self) -> &'static str {
        match self {
            Sum::Total => "total",
            Sum::PriceExVat => "price_ex_vat",
            Sum::VatAmount => "vat_amount",
        }
    }

    pub fn others(self) -> [Sum; 2] {
        match self {
            Sum::Total => [Sum::VatAmount, Sum::PriceExVat],
            Sum::PriceExVat => [Sum::Total, Sum::VatAmount],
            Sum::VatAmount => [Sum::Total, Sum::PriceExVat],
        }
    }
}

/// One row's amounts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Amounts {
    pub total: f64,
    pub price_ex_vat: f64,
    pub vat_amount: f64,
}

impl Amounts {
    pub fn from_parts(parts: [(Sum, f64); 3]) -> Self {
        let mut a = Amounts::default();
        for (which, v) in parts {
            a.set(which, v);
        }
        a
    }

    pub fn get(&self, which: Sum) -> f64 {
        match which {
            Sum::Total => self.total,
            Sum::PriceExVat => self.price_ex_vat,
            Sum::VatAmount => self.vat_amount,
        }
    }

    pub fn set(&mut self, which: Sum, v: f64) {
        match which {
            Sum::Total => self.total = v,
            Sum::PriceExVat => self.price_ex_vat = v,
            Sum::VatAmount => self.vat_amount = v,
        }
    }

    /// Derive `which` from the other two amounts.
    pub fn derive(&self, which: Sum) -> f64 {
        match which {
            Sum::Total => self.price_ex_vat + self.vat_amount,
            Sum::PriceExVat => self.total - self.vat_amount,
            Sum::VatAmount => self.total - self.price_ex_vat,
        }
    }

    pub fn consistent(&self) -> bool {
        (self.total - (self.price_ex_vat + self.vat_amount)).abs() <= SUM_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> ReferenceData {
        ReferenceData::bundled().unwrap()
    }

    fn run(columns: &[&str], rows: &[Vec<&str>], opts: &Options) -> (Table, Diagnostics) {
        let mut t = Table::from_str_rows(columns, rows);
        let mut d = Diagnostics::new();
        change_names(&mut t, &refs(), opts, &mut d).unwrap();
        (t, d)
    }

    #[test]
    fn exact_names_are_mapped() {
        let (t, d) = run(
            &["Kunnan nimi", "KUNTA NUMERO", "summa", "org_id"],
            &[vec!["Turku", "853", "10", "0204819-8"]],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["org_name", "org_number", "total", "org_id"]);
        assert!(d.is_empty());
    }

    #[test]
    fn empty_table_is_an_error() {
        let mut t = Table::from_str_rows(&["a"], &[]);
        let err = change_names(&mut t, &refs(), &Options::default(), &mut Diagnostics::new());
        assert!(matches!(err, Err(OstaError::EmptyTable(_))));
    }

    #[test]
    fn bad_threshold_is_an_error() {
        let mut t = Table::from_str_rows(&["a"], &[vec!["1"]]);
        let opts = Options {
            match_th: 1.5,
            ..Options::default()
        };
        let err = change_names(&mut t, &refs(), &opts, &mut Diagnostics::new());
        assert!(matches!(err, Err(OstaError::Config(_))));
    }

    #[test]
    fn guesses_from_data_patterns() {
        let (t, d) = run(
            &["Test1", "Test2", "Test3"],
            &[
                vec!["FI", "01.02.2023", "1"],
                vec!["FI", "02.02.2023", "2"],
                vec!["FI", "03.02.2023", "2"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["country", "date", "voucher"]);
        assert!(d.has(WarningKind::ColumnsRenamed));
        assert!(!d.has(WarningKind::ColumnsNotDetected));
    }

    #[test]
    fn guesses_org_number_and_id_from_pairs() {
        let (t, _) = run(
            &["Test1", "org_name", "Test3"],
            &[
                vec!["484", "Merikarvia", "0135202-4"],
                vec!["484", "Merikarvia", "0135202-4"],
                vec!["484", "Merikarvia", "0135202-4"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["org_number", "org_name", "org_id"]);
    }

    #[test]
    fn unknown_bids_are_suppliers_or_plain_bids() {
        // Valid check digits, none of them a municipality.
        let rows = vec![
            vec!["Acme Oy", "1234567-1"],
            vec!["Beta Oy", "7654321-2"],
            vec!["Gamma Oy", "2222222-9"],
        ];
        assert!(rows.iter().all(|r| is_valid_bid(r[1])));
        let (t, _) = run(&["suppl_name", "Test"], &rows, &Options::default());
        assert_eq!(t.columns[1], "suppl_id");

        let lone: Vec<Vec<&str>> = rows.iter().map(|r| vec![r[1]]).collect();
        let (t, _) = run(&["Test"], &lone, &Options::default());
        assert_eq!(t.columns[0], "bid");
    }

    #[test]
    fn bid_differing_from_suppl_id_is_org_id() {
        let (t, _) = run(
            &["suppl_id", "Test"],
            &[
                vec!["3333333-8", "1234567-1"],
                vec!["4444444-7", "7654321-2"],
                vec!["5555555-6", "2222222-9"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["suppl_id", "org_id"]);
    }

    #[test]
    fn bid_equal_to_org_id_is_org_id() {
        let (t, d) = run(
            &["org_id", "Test"],
            &[
                vec!["3333333-8", "3333333-8"],
                vec!["4444444-7", "4444444-7"],
                vec!["5555555-6", "5555555-6"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["org_id", "org_id_2"]);
        assert!(d.has(WarningKind::DuplicatedColumns));
    }

    #[test]
    fn mostly_repeated_bid_is_org_id() {
        let (t, _) = run(
            &["suppl_name", "Test"],
            &[
                vec!["Acme Oy", "3333333-8"],
                vec!["Beta Oy", "3333333-8"],
                vec!["Gamma Oy", "3333333-8"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["suppl_name", "org_id"]);
    }

    #[test]
    fn municipality_names_paired_with_suppliers_stay_unnamed() {
        let rows = vec![
            vec!["Acme Oy", "Turku"],
            vec!["Beta Oy", "Espoo"],
            vec!["Gamma Oy", "Tampere"],
        ];
        let (t, d) = run(&["suppl_name", "Test"], &rows, &Options::default());
        assert_eq!(t.columns, vec!["suppl_name", "Test"]);
        assert!(d.has(WarningKind::ColumnsNotDetected));

        let alone: Vec<Vec<&str>> = rows.iter().map(|r| vec![r[1]]).collect();
        let (t, _) = run(&["Test"], &alone, &Options::default());
        assert_eq!(t.columns, vec!["org_name"]);
    }

    #[test]
    fn guesses_service_and_account_codes() {
        let (t, _) = run(
            &["Test1", "Test2", "Test3", "Test4"],
            &[
                // Accounts vary within a service, so the two do not pair.
                vec!["2110", "Perusopetus", "4400", "Vuokrat"],
                vec!["2110", "Perusopetus", "4500", "Ostovelat"],
                vec!["5100", "Jätehuolto", "4700", "Avustukset"],
            ],
            &Options::default(),
        );
        assert_eq!(
            t.columns,
            vec!["service_cat", "service_cat_name", "account_number", "account_name"]
        );
    }

    #[test]
    fn codes_paired_with_account_columns_are_not_services() {
        // 1100, 1200 and 3100 are both service and account numbers.
        let rows = vec![
            vec!["Maa- ja vesialueet", "1100"],
            vec!["Koneet ja kalusto", "1200"],
            vec!["Maksutuotot", "3100"],
        ];
        let (t, _) = run(&["account_name", "Test"], &rows, &Options::default());
        assert_eq!(t.columns, vec!["account_name", "account_number"]);

        let alone: Vec<Vec<&str>> = rows.iter().map(|r| vec![r[1]]).collect();
        let (t, _) = run(&["Test"], &alone, &Options::default());
        assert_eq!(t.columns, vec!["service_cat"]);
    }

    #[test]
    fn guesses_vat_and_names_from_reference_tables() {
        let (t, _) = run(
            &["Test1", "Test2"],
            &[vec!["FI02048198", "Turku"], vec!["FI01012636", "Espoo"]],
            &Options::default(),
        );
        assert_eq!(t.columns, vec!["vat_number", "org_name"]);
    }

    #[test]
    fn guesses_missing_sum_column() {
        let (t, _) = run(
            &["total", "vat_amount", "Test3"],
            &[
                vec!["10", "1.5", "8.5"],
                vec!["12", "2.5", "9.5"],
                vec!["13.5", "3.0", "10.5"],
            ],
            &Options::default(),
        );
        assert_eq!(t.columns[2], "price_ex_vat");
    }

    #[test]
    fn loose_name_match_uses_threshold() {
        let fields = Fields::bundled().unwrap();
        assert_eq!(loose_match("summa.", &fields, 0.9), "total");
        assert_eq!(loose_match("zzzz", &fields, 0.9), "zzzz");
        assert_eq!(loose_match("", &fields, 0.0), "");
    }

    #[test]
    fn no_guessing_reports_undetected() {
        let opts = Options {
            guess_names: false,
            ..Options::default()
        };
        let (t, d) = run(&["Test1", "summa"], &[vec!["FI", "1"]], &opts);
        assert_eq!(t.columns, vec!["Test1", "total"]);
        let w = d.of_kind(WarningKind::ColumnsNotDetected).next().unwrap();
        assert_eq!(w.rows, vec![vec!["Test1".to_string()]]);
    }

    #[test]
    fn duplicated_names_get_suffixes() {
        let (t, d) = run(&["summa", "total", "Summa"], &[vec!["1", "2", "3"]], &Options::default());
        assert_eq!(t.columns, vec!["total", "total_2", "total_3"]);
        assert!(d.has(WarningKind::DuplicatedColumns));

        let opts = Options {
            make_unique: false,
            ..Options::default()
        };
        let (t, d) = run(&["summa", "total"], &[vec!["1", "2"]], &opts);
        assert_eq!(t.columns, vec!["total", "total"]);
        assert!(!d.has(WarningKind::DuplicatedColumns));
    }

    #[test]
    fn amounts_derive_the_missing_one() {
        let a = Amounts {
            total: 12.5,
            price_ex_vat: 10.0,
            vat_amount: 2.5,
        };
        assert!(a.consistent());
        assert_eq!(a.derive(Sum::Total), 12.5);
        assert_eq!(a.derive(Sum::PriceExVat), 10.0);
        assert_eq!(a.derive(Sum::VatAmount), 2.5);
        let mut b = a;
        b.set(Sum::Total, 13.0);
        assert!(!b.consistent());
        assert_eq!(b.get(Sum::Total), 13.0);
    }
}
