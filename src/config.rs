// Tunables for renaming, cleaning and enrichment.
//
// Options can come from a TOML file; command-line flags are applied on top
// of it in `main.rs`. Every threshold is a share in [0, 1].
use crate::error::{OstaError, Result};
use crate::util::is_percentage;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Guess names of columns without an exact dictionary match.
    pub guess_names: bool,
    /// Suffix duplicated column names with `_2`, `_3`, ...
    pub make_unique: bool,
    /// Fuzzy threshold for loose column-name matching.
    pub pattern_th: f64,
    /// Share of values that must fit a pattern for a column to be guessed.
    pub match_th: f64,
    /// Threshold for business-ID columns; falls back to `match_th`.
    pub bid_patt_th: Option<f64>,
    /// Threshold for country-code columns; falls back to `match_th`.
    pub country_code_th: Option<f64>,
    /// Fuzzy threshold when matching names against reference tables.
    pub db_pattern_th: f64,

    pub date_format: String,
    pub dayfirst: Option<bool>,
    pub yearfirst: Option<bool>,
    pub country_format: String,
    pub db_year: Option<Vec<i64>>,
    pub subset_account_data: Option<String>,

    pub disable_voucher: bool,
    pub disable_vat_number: bool,
    pub disable_date: bool,
    pub disable_org: bool,
    pub disable_suppl: bool,
    pub disable_account: bool,
    pub disable_service: bool,
    pub disable_country: bool,
    pub disable_sums: bool,

    pub fields: Option<PathBuf>,
    pub org_data: Option<PathBuf>,
    pub suppl_data: Option<PathBuf>,
    pub account_data: Option<PathBuf>,
    pub service_data: Option<PathBuf>,
    pub land_data: Option<PathBuf>,
    /// Extra `raw name = standardized name` entries for the field dictionary.
    pub field_aliases: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            guess_names: true,
            make_unique: true,
            pattern_th: 0.9,
            match_th: 0.8,
            bid_patt_th: None,
            country_code_th: None,
            db_pattern_th: 0.7,
            date_format: "%d-%m-%Y".to_string(),
            dayfirst: None,
            yearfirst: None,
            country_format: "code_2char".to_string(),
            db_year: None,
            subset_account_data: None,
            disable_voucher: false,
            disable_vat_number: false,
            disable_date: false,
            disable_org: false,
            disable_suppl: false,
            disable_account: false,
            disable_service: false,
            disable_country: false,
            disable_sums: false,
            fields: None,
            org_data: None,
            suppl_data: None,
            account_data: None,
            service_data: None,
            land_data: None,
            field_aliases: BTreeMap::new(),
        }
    }
}

pub const ACCOUNT_SUBSETS: [&str; 2] = ["balance_sheet", "income_statement"];

impl Options {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: Options = toml::from_str(text)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Options::from_toml_str(&text)
    }

    pub fn bid_th(&self) -> f64 {
        self.bid_patt_th.unwrap_or(self.match_th)
    }

    pub fn country_th(&self) -> f64 {
        self.country_code_th.unwrap_or(self.match_th)
    }

    /// Reject out-of-range thresholds and unknown option values.
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("pattern_th", Some(self.pattern_th)),
            ("match_th", Some(self.match_th)),
            ("bid_patt_th", self.bid_patt_th),
            ("country_code_th", self.country_code_th),
            ("db_pattern_th", Some(self.db_pattern_th)),
        ];
        for (name, value) in thresholds {
            if let Some(v) = value {
                if !is_percentage(v) {
                    return Err(OstaError::Config(format!(
                        "'{}' must be a number between 0-1.",
                        name
                    )));
                }
            }
        }
        if let Some(subset) = &self.subset_account_data {
            if !ACCOUNT_SUBSETS.contains(&subset.as_str()) {
                return Err(OstaError::Config(format!(
                    "'subset_account_data' must be one of {:?}",
                    ACCOUNT_SUBSETS
                )));
            }
        }
        if self.date_format.trim().is_empty() {
            return Err(OstaError::Config("'date_format' must not be empty.".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let o = Options::default();
        o.validate().unwrap();
        assert_eq!(o.bid_th(), 0.8);
        assert_eq!(o.country_th(), 0.8);
    }

    #[test]
    fn parses_partial_toml() {
        let o = Options::from_toml_str(
            "match_th = 0.6\nbid_patt_th = 0.65\ndisable_sums = true\ndb_year = [2022]\n",
        )
        .unwrap();
        assert_eq!(o.match_th, 0.6);
        assert_eq!(o.bid_th(), 0.65);
        assert_eq!(o.country_th(), 0.6);
        assert!(o.disable_sums);
        assert!(o.guess_names);
        assert_eq!(o.db_year, Some(vec![2022]));
        assert!(o.field_aliases.is_empty());
    }

    #[test]
    fn parses_field_aliases() {
        let o = Options::from_toml_str("[field_aliases]\n\"Ostaja\" = \"org_name\"\n").unwrap();
        assert_eq!(o.field_aliases.get("Ostaja").map(String::as_str), Some("org_name"));
    }

    #[test]
    fn rejects_bad_thresholds() {
        for bad in ["match_th = 2.0", "pattern_th = -0.5", "country_code_th = 1.5"] {
            assert!(Options::from_toml_str(bad).is_err(), "{}", bad);
        }
        assert!(Options::from_toml_str("match_th = \"0.1\"").is_err());
        assert!(Options::from_toml_str("subset_account_data = \"test\"").is_err());
        assert!(Options::from_toml_str("subset_account_data = \"balance_sheet\"").is_ok());
    }
}
