// Bundled reference tables and the column-name dictionary.
//
// The tables are compiled into the binary so the tool works out of the
// box; every one of them can be replaced by a user-provided CSV through
// `Options`.
use crate::config::Options;
use crate::error::{OstaError, Result};
use crate::loader;
use crate::table::{clean_cell, Table};
use crate::util::parse_i64_safe;
use csv::ReaderBuilder;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

const FIELDS_CSV: &str = include_str!("../resources/fields.csv");
const MUNICIPALITY_CSV: &str = include_str!("../resources/municipality_codes.csv");
const LAND_CSV: &str = include_str!("../resources/land_codes.csv");
const ACCOUNT_CSV: &str = include_str!("../resources/account_info.csv");
const SERVICE_CSV: &str = include_str!("../resources/service_codes.csv");

/// Which bundled table to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bundled {
    Municipalities,
    LandCodes,
    Accounts,
    Services,
}

impl Bundled {
    fn source(self) -> &'static str {
        match self {
            Bundled::Municipalities => MUNICIPALITY_CSV,
            Bundled::LandCodes => LAND_CSV,
            Bundled::Accounts => ACCOUNT_CSV,
            Bundled::Services => SERVICE_CSV,
        }
    }
}

/// Parse comma-separated text into a `Table`. Every cell stays a string so
/// codes such as "091" keep their leading zeros.
pub fn table_from_csv_str(text: &str) -> Result<Table> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(clean_cell).collect());
    }
    Ok(Table::new(columns, rows))
}

pub fn load_bundled(which: Bundled) -> Result<Table> {
    table_from_csv_str(which.source())
}

/// Load a user table if a path is given, otherwise the bundled one.
pub fn load_or_bundled(path: Option<&Path>, which: Bundled) -> Result<Table> {
    match path {
        Some(p) => loader::read_table(p),
        None => load_bundled(which),
    }
}

/// Require the given columns to be present in a reference table.
pub fn require_columns(db: &Table, name: &str, columns: &[&str]) -> Result<()> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !db.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OstaError::MissingColumns {
            table: name.to_string(),
            columns: missing,
        })
    }
}

/// Distinct years available in a table with a `year` column.
pub fn available_years(db: &Table) -> Vec<i64> {
    let Some(idx) = db.col_index("year") else {
        return Vec::new();
    };
    db.values(idx)
        .into_iter()
        .filter_map(|v| parse_i64_safe(Some(v)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Keep only rows whose `year` falls within the range of `years`, then
/// de-duplicate on `(number, name)`.
///
/// Every requested year that the table does not have is an error, listing
/// the available ones.
pub fn subset_by_year(db: &Table, years: &[i64]) -> Result<Table> {
    let available = available_years(db);
    let mut out = db.clone();
    if !years.is_empty() {
        let known: Vec<i64> = years.iter().copied().filter(|y| available.contains(y)).collect();
        if known.is_empty() {
            return Err(OstaError::Config(format!(
                "'db_year' must be one of the following options: {:?}",
                available
            )));
        }
        let lo = known.iter().copied().min().unwrap_or_default();
        let hi = known.iter().copied().max().unwrap_or_default();
        if let Some(yi) = db.col_index("year") {
            out.rows.retain(|r| {
                parse_i64_safe(r[yi].as_deref())
                    .map(|y| (lo..=hi).contains(&y))
                    .unwrap_or(false)
            });
        }
    }
    Ok(dedup_on(out, &["number", "name"]))
}

/// Drop rows repeating an earlier row's values in the given columns.
pub fn dedup_on(mut db: Table, columns: &[&str]) -> Table {
    let idx: Vec<usize> = columns.iter().filter_map(|c| db.col_index(c)).collect();
    if idx.is_empty() {
        return db;
    }
    let mut seen = std::collections::HashSet::new();
    db.rows.retain(|r| {
        let key: Vec<Option<String>> = idx
            .iter()
            .map(|&i| r[i].as_ref().map(|v| crate::util::match_key(v)))
            .collect();
        seen.insert(key)
    });
    db
}

/// Dictionary from raw column names (lowercase) to standardized names.
#[derive(Debug, Clone, Default)]
pub struct Fields {
    map: HashMap<String, String>,
    // Insertion order, for deterministic fuzzy matching.
    keys: Vec<String>,
}

impl Fields {
    /// The bundled dictionary. Every standardized name also maps to itself.
    pub fn bundled() -> Result<Self> {
        let table = table_from_csv_str(FIELDS_CSV)?;
        let mut fields = Fields::from_table(&table)?;
        let values: Vec<String> = fields.keys.iter().map(|k| fields.map[k].clone()).collect();
        for v in values {
            fields.insert(&v, &v);
        }
        Ok(fields)
    }

    /// Build from a table with `key` and `value` columns.
    pub fn from_table(table: &Table) -> Result<Self> {
        require_columns(table, "fields", &["key", "value"])?;
        let (Some(ki), Some(vi)) = (table.col_index("key"), table.col_index("value")) else {
            return Ok(Fields::default());
        };
        let mut fields = Fields::default();
        for row in &table.rows {
            if let (Some(k), Some(v)) = (&row[ki], &row[vi]) {
                fields.insert(k, v);
            }
        }
        Ok(fields)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Fields::from_table(&loader::read_table(path)?)
    }

    /// Add entries; a repeated key takes the new value.
    pub fn extend<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in pairs {
            self.insert(k, v);
        }
    }

    fn insert(&mut self, key: &str, value: &str) {
        let key = key.trim().to_lowercase();
        if !self.map.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.map.insert(key, value.trim().to_string());
    }

    /// Exact, case-insensitive lookup of a raw column name.
    pub fn get(&self, raw: &str) -> Option<&str> {
        self.map.get(&raw.trim().to_lowercase()).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Every reference table a run needs, loaded once.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub fields: Fields,
    pub municipalities: Table,
    pub land_codes: Table,
    pub accounts: Table,
    pub services: Table,
    /// Supplier register; there is no bundled one.
    pub suppliers: Option<Table>,
}

impl ReferenceData {
    /// Load user-provided tables where `Options` names them, bundled ones
    /// otherwise.
    pub fn load(opts: &Options) -> Result<Self> {
        let mut fields = match &opts.fields {
            Some(p) => Fields::from_path(p)?,
            None => Fields::bundled()?,
        };
        fields.extend(
            opts.field_aliases
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let municipalities = load_or_bundled(opts.org_data.as_deref(), Bundled::Municipalities)?;
        require_columns(&municipalities, "org_data", &["number", "name", "bid"])?;
        let land_codes = load_or_bundled(opts.land_data.as_deref(), Bundled::LandCodes)?;
        let accounts = load_or_bundled(opts.account_data.as_deref(), Bundled::Accounts)?;
        require_columns(&accounts, "account_data", &["number", "name"])?;
        let services = load_or_bundled(opts.service_data.as_deref(), Bundled::Services)?;
        require_columns(&services, "service_data", &["number", "name"])?;
        let suppliers = match &opts.suppl_data {
            Some(p) => {
                let t = loader::read_table(p)?;
                require_columns(&t, "suppl_data", &["number", "name", "bid"])?;
                Some(t)
            }
            None => None,
        };
        debug!(
            "reference data: {} fields, {} municipalities, {} countries",
            fields.len(),
            municipalities.n_rows(),
            land_codes.n_rows()
        );
        Ok(ReferenceData {
            fields,
            municipalities,
            land_codes,
            accounts,
            services,
            suppliers,
        })
    }

    pub fn bundled() -> Result<Self> {
        ReferenceData::load(&Options::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_user_tables_over_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suppliers.csv");
        std::fs::write(&path, "number,name,bid\n1,Acme Oy,0135202-4\n").unwrap();
        let opts = Options {
            suppl_data: Some(path),
            field_aliases: [("Ostaja".to_string(), "org_name".to_string())].into(),
            ..Options::default()
        };
        let refs = ReferenceData::load(&opts).unwrap();
        assert_eq!(refs.suppliers.as_ref().map(Table::n_rows), Some(1));
        assert_eq!(refs.fields.get("ostaja"), Some("org_name"));
        assert!(refs.municipalities.n_rows() > 20);

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "id,title\n1,x\n").unwrap();
        let opts = Options {
            org_data: Some(bad),
            ..Options::default()
        };
        assert!(matches!(
            ReferenceData::load(&opts),
            Err(OstaError::MissingColumns { .. })
        ));
    }

    #[test]
    fn bundled_tables_load() {
        let mun = load_bundled(Bundled::Municipalities).unwrap();
        require_columns(&mun, "org_data", &["number", "name", "bid"]).unwrap();
        let turku = mun.rows.iter().find(|r| r[1].as_deref() == Some("Turku")).unwrap();
        assert_eq!(turku[0].as_deref(), Some("853"));
        assert!(crate::validate::is_valid_bid(turku[2].as_deref().unwrap()));

        let land = load_bundled(Bundled::LandCodes).unwrap();
        assert!(land.has_column("code_2char"));
        let acc = load_bundled(Bundled::Accounts).unwrap();
        assert_eq!(available_years(&acc), vec![2021, 2022, 2023]);
    }

    #[test]
    fn every_bundled_bid_is_valid() {
        let mun = load_bundled(Bundled::Municipalities).unwrap();
        let bi = mun.col_index("bid").unwrap();
        assert!(mun.values(bi).iter().all(|b| crate::validate::is_valid_bid(b)));
    }

    #[test]
    fn subsets_by_year_and_dedups() {
        let svc = load_bundled(Bundled::Services).unwrap();
        let per_year = svc.n_rows() / 3;
        let one = subset_by_year(&svc, &[2022]).unwrap();
        assert_eq!(one.n_rows(), per_year);
        // All years collapse to one row per (number, name).
        let all = subset_by_year(&svc, &[]).unwrap();
        assert_eq!(all.n_rows(), per_year);
        assert!(subset_by_year(&svc, &[1999]).is_err());
    }

    #[test]
    fn fields_lookup_is_case_insensitive() {
        let f = Fields::bundled().unwrap();
        assert_eq!(f.get(" Kunnan nimi "), Some("org_name"));
        assert_eq!(f.get("SUMMA"), Some("total"));
        assert_eq!(f.get("org_name"), Some("org_name"));
        assert_eq!(f.get("nothing"), None);
    }

    #[test]
    fn fields_need_key_and_value() {
        let t = Table::from_str_rows(&["key", "val"], &[vec!["a", "b"]]);
        assert!(matches!(
            Fields::from_table(&t),
            Err(OstaError::MissingColumns { .. })
        ));
        let mut own = Fields::default();
        own.extend([("Test1", "suppl_name"), ("test1 ", "org_name")]);
        assert_eq!(own.get("TEST1"), Some("org_name"));
        assert_eq!(own.len(), 1);
    }
}
