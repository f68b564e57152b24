// Data-quality diagnostics.
//
// Cleaning never stops on questionable data: every finding is recorded
// here (and logged) so the user can review it after the run.
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tabled::Tabled;
use tracing::warn;

/// Rows attached to a warning are capped so that a badly broken file does
/// not flood the console.
const MAX_SAMPLE_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ColumnsRenamed,
    ColumnsNotDetected,
    DuplicatedColumns,
    EmptyRemoved,
    FileNotOpened,
    InvalidVoucher,
    InvalidVatNumber,
    DateNotDetected,
    DataMismatch,
    NotDetected,
    PartialMatch,
    NoMatchingColumns,
    OrgDataInconsistent,
    IncorrectDataType,
    CountryNotDetected,
    SumNotNumeric,
    SumMismatch,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde name so console and JSON output agree.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SummaryRow {
    #[serde(rename = "Warning")]
    #[tabled(rename = "Warning")]
    pub kind: String,
    #[serde(rename = "Count")]
    #[tabled(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Example")]
    #[tabled(rename = "Example")]
    pub example: String,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it.
    pub fn push(&mut self, kind: WarningKind, message: impl Into<String>, rows: Vec<Vec<String>>) {
        let message = message.into();
        warn!(kind = %kind, "{}", message);
        let rows = rows.into_iter().take(MAX_SAMPLE_ROWS).collect();
        self.warnings.push(Warning {
            kind,
            message,
            rows,
        });
    }

    pub fn has(&self, kind: WarningKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// One row per warning kind: how often it occurred and the first message.
    pub fn summary(&self) -> Vec<SummaryRow> {
        let mut by_kind: BTreeMap<WarningKind, (usize, &str)> = BTreeMap::new();
        for w in &self.warnings {
            let e = by_kind.entry(w.kind).or_insert((0, w.message.as_str()));
            e.0 += 1;
        }
        by_kind
            .into_iter()
            .map(|(kind, (count, example))| SummaryRow {
                kind: kind.to_string(),
                count,
                example: example.lines().next().unwrap_or_default().to_string(),
            })
            .collect()
    }
}

/// What `summary.json` holds for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    pub summary: Vec<SummaryRow>,
    pub warnings: Vec<Warning>,
}

impl RunSummary {
    pub fn new(table: &crate::table::Table, diagnostics: &Diagnostics) -> Self {
        RunSummary {
            rows: table.n_rows(),
            columns: table.columns.clone(),
            summary: diagnostics.summary(),
            warnings: diagnostics.warnings.clone(),
        }
    }
}

/// Render a cell tuple for a warning row.
pub fn render_row(values: &[Option<String>]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.clone().unwrap_or_else(|| "<empty>".to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_and_summarizes() {
        let mut d = Diagnostics::new();
        assert!(d.is_empty());
        d.push(WarningKind::PartialMatch, "first", vec![vec!["a".into()]]);
        d.push(WarningKind::PartialMatch, "second", vec![]);
        d.push(WarningKind::SumMismatch, "sums\nmore", vec![]);
        assert!(d.has(WarningKind::PartialMatch));
        assert!(!d.has(WarningKind::NotDetected));
        assert_eq!(d.of_kind(WarningKind::PartialMatch).count(), 2);

        let s = d.summary();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].kind, "partial_match");
        assert_eq!(s[0].count, 2);
        assert_eq!(s[0].example, "first");
        assert_eq!(s[1].example, "sums");
    }

    #[test]
    fn caps_sample_rows() {
        let mut d = Diagnostics::new();
        let rows = (0..100).map(|i| vec![i.to_string()]).collect();
        d.push(WarningKind::NotDetected, "many", rows);
        assert_eq!(d.warnings[0].rows.len(), MAX_SAMPLE_ROWS);
    }

    #[test]
    fn renders_empty_cells() {
        assert_eq!(
            render_row(&[Some("x".into()), None]),
            vec!["x".to_string(), "<empty>".to_string()]
        );
    }
}
