// Reconciling invoice columns against reference tables.
//
// Invoices identify the buyer (or supplier, account, service) by any mix
// of ID, number and name, often with typos. Each distinct combination is
// looked up once and, when found, rewritten to the reference spelling.
use crate::fuzzy::{extract_one, token_sort_ratio};
use crate::report::{render_row, Diagnostics, WarningKind};
use crate::table::{Cell, Table};
use crate::util::{match_key, values_equal};
use crate::validate::is_valid_bid;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Column names of one party (buyer or supplier) on the invoice side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartyColumns {
    pub id: &'static str,
    pub vat_number: &'static str,
    pub number: &'static str,
    pub name: &'static str,
}

pub const ORG: PartyColumns = PartyColumns {
    id: "org_id",
    vat_number: "org_vat_number",
    number: "org_number",
    name: "org_name",
};

pub const SUPPL: PartyColumns = PartyColumns {
    id: "suppl_id",
    vat_number: "suppl_vat_number",
    number: "suppl_number",
    name: "suppl_name",
};

impl PartyColumns {
    /// Invoice columns in lookup precedence, paired with the reference
    /// columns they match.
    pub fn lookup_pairs(&self) -> [(&'static str, &'static str); 3] {
        [(self.id, "bid"), (self.number, "number"), (self.name, "name")]
    }

    /// Join keys for enrichment, most specific first.
    pub fn join_pairs(&self) -> [(&'static str, &'static str); 4] {
        [
            (self.id, "bid"),
            (self.vat_number, "vat_number"),
            (self.number, "number"),
            (self.name, "name"),
        ]
    }
}

/// Outcome of reconciling one distinct tuple.
#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Exact(usize),
    Mismatch,
    Partial(usize, f64),
    NotFound,
}

/// Counts of how the distinct tuples were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub exact: usize,
    pub partial: usize,
    pub mismatched: usize,
    pub not_found: usize,
}

/// Standardize the `pairs` columns of `table` against `db`.
///
/// `pairs` lists `(table column, db column)` in lookup precedence. The
/// first value of a tuple with an exact match in `db` selects the
/// reference row; any other non-empty value disagreeing with that row
/// makes the tuple a mismatch, which is left as is. Without an exact
/// match, a `name` column is fuzzy matched with `token_sort_ratio` at
/// `db_pattern_th`. Rewritten tuples replace every occurrence in `table`.
pub fn standardize_based_on_db(
    table: &mut Table,
    db: &Table,
    pairs: &[(&str, &str)],
    db_pattern_th: f64,
    label: &str,
    diagnostics: &mut Diagnostics,
) -> MatchStats {
    let used: Vec<(usize, usize, &str)> = pairs
        .iter()
        .filter_map(|(t, d)| Some((table.col_index(t)?, db.col_index(d)?, *d)))
        .collect();
    if used.is_empty() {
        let wanted: Vec<&str> = pairs.iter().map(|(t, _)| *t).collect();
        diagnostics.push(
            WarningKind::NoMatchingColumns,
            format!("{}: none of the columns {:?} were found.", label, wanted),
            vec![],
        );
        return MatchStats::default();
    }

    let t_idx: Vec<usize> = used.iter().map(|u| u.0).collect();
    let indexes: Vec<HashMap<String, usize>> = used
        .iter()
        .map(|&(_, d, _)| {
            let mut index = HashMap::new();
            for (r, row) in db.rows.iter().enumerate() {
                if let Some(v) = &row[d] {
                    index.entry(match_key(v)).or_insert(r);
                }
            }
            index
        })
        .collect();
    let name_pos = used.iter().position(|u| u.2 == "name");
    let db_names: Vec<&str> = name_pos
        .map(|p| db.values(used[p].1))
        .unwrap_or_default();

    let mut stats = MatchStats::default();
    let mut changes: HashMap<Vec<Cell>, Vec<Cell>> = HashMap::new();
    let mut mismatched = Vec::new();
    let mut partial = Vec::new();
    let mut not_found = Vec::new();

    for tuple in table.unique_tuples(&t_idx) {
        if tuple.iter().all(Option::is_none) {
            continue;
        }
        let resolution = resolve(&tuple, db, &used, &indexes, name_pos, &db_names, db_pattern_th);
        match resolution {
            Resolution::Exact(r) => {
                stats.exact += 1;
                let new = reference_tuple(&tuple, db, &used, r);
                if new != tuple {
                    changes.insert(tuple, new);
                }
            }
            Resolution::Mismatch => {
                stats.mismatched += 1;
                mismatched.push(render_row(&tuple));
            }
            Resolution::Partial(r, score) => {
                stats.partial += 1;
                let new = reference_tuple(&tuple, db, &used, r);
                let mut row = render_row(&tuple);
                row.extend(render_row(&new));
                row.push(format!("{:.0}", score));
                partial.push(row);
                changes.insert(tuple, new);
            }
            Resolution::NotFound => {
                stats.not_found += 1;
                not_found.push(render_row(&tuple));
            }
        }
    }

    if !changes.is_empty() {
        for row in table.rows.iter_mut() {
            let key: Vec<Cell> = t_idx.iter().map(|&c| row[c].clone()).collect();
            if let Some(new) = changes.get(&key) {
                for (&c, v) in t_idx.iter().zip(new) {
                    row[c] = v.clone();
                }
            }
        }
    }

    let columns: Vec<&str> = used.iter().map(|&(t, _, _)| table.columns[t].as_str()).collect();
    if !mismatched.is_empty() {
        diagnostics.push(
            WarningKind::DataMismatch,
            format!(
                "{}: {} value combinations of {:?} disagree with the reference data and were left unchanged.",
                label,
                mismatched.len(),
                columns
            ),
            mismatched,
        );
    }
    if !partial.is_empty() {
        diagnostics.push(
            WarningKind::PartialMatch,
            format!(
                "{}: {} value combinations of {:?} were replaced by the closest match in the reference data.",
                label,
                partial.len(),
                columns
            ),
            partial,
        );
    }
    if !not_found.is_empty() {
        diagnostics.push(
            WarningKind::NotDetected,
            format!(
                "{}: {} value combinations of {:?} were not found in the reference data.",
                label,
                not_found.len(),
                columns
            ),
            not_found,
        );
    }
    info!(
        "{}: {} exact, {} partial, {} mismatched, {} not found",
        label, stats.exact, stats.partial, stats.mismatched, stats.not_found
    );
    stats
}

fn resolve(
    tuple: &[Cell],
    db: &Table,
    used: &[(usize, usize, &str)],
    indexes: &[HashMap<String, usize>],
    name_pos: Option<usize>,
    db_names: &[&str],
    db_pattern_th: f64,
) -> Resolution {
    let exact = tuple
        .iter()
        .zip(indexes)
        .find_map(|(v, index)| index.get(&match_key(v.as_deref()?)).copied());
    if let Some(r) = exact {
        let disagrees = tuple.iter().zip(used).any(|(v, &(_, d, _))| {
            match (v.as_deref(), db.get(r, d)) {
                (Some(ours), Some(theirs)) => !values_equal(ours, theirs),
                _ => false,
            }
        });
        return if disagrees {
            Resolution::Mismatch
        } else {
            Resolution::Exact(r)
        };
    }
    let Some(p) = name_pos else {
        return Resolution::NotFound;
    };
    let Some(name) = tuple[p].as_deref() else {
        return Resolution::NotFound;
    };
    match extract_one(name, db_names.iter().copied(), token_sort_ratio) {
        Some((best, score)) if score >= db_pattern_th * 100.0 => {
            debug!("'{}' matched '{}' with score {:.1}", name, best, score);
            match indexes[p].get(&match_key(best)) {
                Some(&r) => Resolution::Partial(r, score),
                None => Resolution::NotFound,
            }
        }
        _ => Resolution::NotFound,
    }
}

/// The reference values of row `r`, keeping our own value where the
/// reference cell is empty.
fn reference_tuple(tuple: &[Cell], db: &Table, used: &[(usize, usize, &str)], r: usize) -> Vec<Cell> {
    tuple
        .iter()
        .zip(used)
        .map(|(v, &(_, d, _))| db.get(r, d).map(str::to_string).or_else(|| v.clone()))
        .collect()
}

/// Flag inconsistent party data: distinct (id, number, name) combinations
/// with empty values, invalid business IDs, or an ID, number or name that
/// occurs in more than one combination.
///
/// Returns the number of flagged combinations.
pub fn check_org_data(table: &Table, party: &PartyColumns, diagnostics: &mut Diagnostics) -> usize {
    let names = [party.id, party.number, party.name];
    let present: Vec<(usize, &str)> = names
        .iter()
        .filter_map(|n| table.col_index(n).map(|i| (i, *n)))
        .collect();
    if present.is_empty() {
        return 0;
    }
    let idx: Vec<usize> = present.iter().map(|p| p.0).collect();
    let tuples: Vec<Vec<Cell>> = table
        .unique_tuples(&idx)
        .into_iter()
        .filter(|t| t.iter().any(Option::is_some))
        .collect();

    let mut flagged: Vec<bool> = vec![false; tuples.len()];
    let mut reasons: Vec<Vec<&str>> = vec![Vec::new(); tuples.len()];
    for (k, t) in tuples.iter().enumerate() {
        if t.iter().any(Option::is_none) {
            flagged[k] = true;
            reasons[k].push("empty value");
        }
    }
    for (pos, &(_, name)) in present.iter().enumerate() {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for t in &tuples {
            if let Some(v) = &t[pos] {
                *seen.entry(match_key(v)).or_insert(0) += 1;
            }
        }
        let repeated: HashSet<&String> = seen.iter().filter(|(_, n)| **n > 1).map(|(k, _)| k).collect();
        for (k, t) in tuples.iter().enumerate() {
            let Some(v) = &t[pos] else { continue };
            if name == party.id && !is_valid_bid(v) {
                flagged[k] = true;
                reasons[k].push("invalid business ID");
            }
            if repeated.contains(&match_key(v)) {
                flagged[k] = true;
                reasons[k].push(if name == party.id {
                    "shared business ID"
                } else if name == party.number {
                    "shared number"
                } else {
                    "shared name"
                });
            }
        }
    }

    let rows: Vec<Vec<String>> = tuples
        .iter()
        .zip(&flagged)
        .zip(&reasons)
        .filter(|((_, f), _)| **f)
        .map(|((t, _), why)| {
            let mut row = render_row(t);
            row.push(why.join(", "));
            row
        })
        .collect();
    let count = rows.len();
    if count > 0 {
        let columns: Vec<&str> = present.iter().map(|p| p.1).collect();
        diagnostics.push(
            WarningKind::OrgDataInconsistent,
            format!(
                "{} combinations of {:?} are inconsistent. Please check them.",
                count, columns
            ),
            rows,
        );
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{load_bundled, Bundled};

    fn municipalities() -> Table {
        load_bundled(Bundled::Municipalities).unwrap()
    }

    fn run(table: &mut Table, db: &Table, pairs: &[(&str, &str)]) -> (MatchStats, Diagnostics) {
        let mut d = Diagnostics::new();
        let stats = standardize_based_on_db(table, db, pairs, 0.7, "org", &mut d);
        (stats, d)
    }

    #[test]
    fn exact_match_standardizes_spelling() {
        let mut t = Table::from_str_rows(
            &["org_number", "org_name"],
            &[vec!["91", "helsinki"], vec!["91", "helsinki"], vec!["853", ""]],
        );
        let (stats, d) = run(&mut t, &municipalities(), &ORG.lookup_pairs());
        assert_eq!(stats.exact, 2);
        assert!(d.is_empty());
        assert_eq!(t.get(0, 0), Some("091"));
        assert_eq!(t.get(1, 1), Some("Helsinki"));
        // The empty name is filled from the reference row.
        assert_eq!(t.get(2, 1), Some("Turku"));
    }

    #[test]
    fn disagreeing_values_are_left_alone() {
        let mut t = Table::from_str_rows(
            &["org_id", "org_name"],
            &[vec!["0204819-8", "Espoo"]],
        );
        let (stats, d) = run(&mut t, &municipalities(), &ORG.lookup_pairs());
        assert_eq!(stats.mismatched, 1);
        assert!(d.has(WarningKind::DataMismatch));
        assert_eq!(t.get(0, 1), Some("Espoo"));
    }

    #[test]
    fn fuzzy_name_match_is_partial() {
        let mut t = Table::from_str_rows(&["org_name"], &[vec!["Merikarvian"], vec!["Xyzzy"]]);
        let (stats, d) = run(&mut t, &municipalities(), &ORG.lookup_pairs());
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(t.get(0, 0), Some("Merikarvia"));
        assert_eq!(t.get(1, 0), Some("Xyzzy"));
        assert!(d.has(WarningKind::PartialMatch));
        assert!(d.has(WarningKind::NotDetected));
    }

    #[test]
    fn warns_without_matching_columns() {
        let mut t = Table::from_str_rows(&["total"], &[vec!["1"]]);
        let (stats, d) = run(&mut t, &municipalities(), &ORG.lookup_pairs());
        assert_eq!(stats, MatchStats::default());
        assert!(d.has(WarningKind::NoMatchingColumns));
    }

    #[test]
    fn flags_inconsistent_org_data() {
        let t = Table::from_str_rows(
            &["org_id", "org_number", "org_name"],
            &[
                vec!["0204819-8", "853", "Turku"],
                vec!["0204819-8", "853", "Turku"],
                vec!["0204819-8", "853", "Turku 2"],
                vec!["0101263-5", "049", "Espoo"],
                vec!["", "091", "Helsinki"],
            ],
        );
        let mut d = Diagnostics::new();
        let n = check_org_data(&t, &ORG, &mut d);
        // Two Turku spellings share id and number, Espoo has a bad check
        // digit, Helsinki lacks an id.
        assert_eq!(n, 4);
        assert!(d.has(WarningKind::OrgDataInconsistent));

        let clean = Table::from_str_rows(&["org_id", "org_name"], &[vec!["0204819-8", "Turku"]]);
        let mut d = Diagnostics::new();
        assert_eq!(check_org_data(&clean, &ORG, &mut d), 0);
        assert!(d.is_empty());
    }
}
