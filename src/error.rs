// Error type shared by every stage of the pipeline.
//
// Data-quality findings are not errors: they are collected as warnings in
// `report::Diagnostics`. Errors are reserved for invalid arguments and
// unreadable inputs, where continuing would produce garbage.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OstaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Excel(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid option: {0}")]
    Config(String),

    #[error("'{0}' must be a non-empty table")]
    EmptyTable(String),

    #[error("'{table}' must include columns {columns:?}")]
    MissingColumns {
        table: String,
        columns: Vec<String>,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, OstaError>;

impl From<calamine::Error> for OstaError {
    fn from(e: calamine::Error) -> Self {
        OstaError::Excel(e.to_string())
    }
}
