// Entry point and high-level CLI flow.
//
// Subcommands run one stage (or the whole pipeline) on a file. Without a
// subcommand the interactive menu runs:
// - Option [1] loads a file and standardizes its column names.
// - Option [2] cleans and enriches the loaded data and exports it together
//   with a JSON summary of the warnings.
// - After exporting, the user can go back to the menu or exit.
mod change_names;
mod clean;
mod config;
mod dates;
mod enrich;
mod error;
mod fuzzy;
mod loader;
mod logging;
mod matching;
mod output;
mod reference;
mod report;
mod table;
mod util;
mod validate;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Options;
use once_cell::sync::Lazy;
use reference::ReferenceData;
use report::{Diagnostics, RunSummary, WarningKind};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use table::Table;
use tracing::info;

const PREVIEW_ROWS: usize = 5;

#[derive(Parser)]
#[command(name = "osta")]
#[command(about = "Standardize, clean and enrich Finnish municipal purchase invoice data")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Standardize column names
    Rename {
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Standardize column names, then clean the data
    Clean {
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Add reference data to an already cleaned file
    Enrich {
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Rename, clean and enrich
    Process {
        input: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Merge several files, or every file of one directory, into one CSV
    Combine {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "combined.csv")]
        output: PathBuf,
        /// Write the warnings as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct CommonArgs {
    /// Output CSV (defaults to `<input>_<stage>.csv`)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// TOML file with options; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the warnings as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Do not guess names of unknown columns
    #[arg(long)]
    no_guess: bool,
    /// Keep duplicated column names as they are
    #[arg(long)]
    no_unique: bool,
    /// Column-name dictionary (key,value CSV)
    #[arg(long)]
    fields: Option<PathBuf>,
    #[arg(long)]
    org_data: Option<PathBuf>,
    #[arg(long)]
    suppl_data: Option<PathBuf>,
    #[arg(long)]
    account_data: Option<PathBuf>,
    #[arg(long)]
    service_data: Option<PathBuf>,
    #[arg(long)]
    land_data: Option<PathBuf>,
    #[arg(long)]
    pattern_th: Option<f64>,
    #[arg(long)]
    match_th: Option<f64>,
    #[arg(long)]
    db_pattern_th: Option<f64>,
    #[arg(long)]
    date_format: Option<String>,
    #[arg(long)]
    country_format: Option<String>,
    /// Years of the account and service tables, e.g. 2021,2022
    #[arg(long, value_delimiter = ',')]
    db_year: Vec<i64>,
}

impl CommonArgs {
    /// Options from `--config`, with flags applied on top.
    fn options(&self) -> Result<Options> {
        let mut opts = match &self.config {
            Some(path) => Options::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => Options::default(),
        };
        if self.no_guess {
            opts.guess_names = false;
        }
        if self.no_unique {
            opts.make_unique = false;
        }
        let paths = [
            (&self.fields, &mut opts.fields),
            (&self.org_data, &mut opts.org_data),
            (&self.suppl_data, &mut opts.suppl_data),
            (&self.account_data, &mut opts.account_data),
            (&self.service_data, &mut opts.service_data),
            (&self.land_data, &mut opts.land_data),
        ];
        for (flag, slot) in paths {
            if let Some(p) = flag {
                *slot = Some(p.clone());
            }
        }
        if let Some(v) = self.pattern_th {
            opts.pattern_th = v;
        }
        if let Some(v) = self.match_th {
            opts.match_th = v;
        }
        if let Some(v) = self.db_pattern_th {
            opts.db_pattern_th = v;
        }
        if let Some(v) = &self.date_format {
            opts.date_format = v.clone();
        }
        if let Some(v) = &self.country_format {
            opts.country_format = v.clone();
        }
        if !self.db_year.is_empty() {
            opts.db_year = Some(self.db_year.clone());
        }
        opts.validate()?;
        Ok(opts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Rename,
    Clean,
    Enrich,
    Process,
}

impl Stage {
    fn suffix(self) -> &'static str {
        match self {
            Stage::Rename => "renamed",
            Stage::Clean => "cleaned",
            Stage::Enrich => "enriched",
            Stage::Process => "processed",
        }
    }
}

/// Run the requested stages on an in-memory table.
fn run_stages(
    table: &mut Table,
    stage: Stage,
    refs: &ReferenceData,
    opts: &Options,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    if matches!(stage, Stage::Rename | Stage::Clean | Stage::Process) {
        change_names::change_names(table, refs, opts, diagnostics)?;
    }
    if matches!(stage, Stage::Clean | Stage::Process) {
        clean::clean_data(table, refs, opts, diagnostics)?;
    }
    if matches!(stage, Stage::Enrich | Stage::Process) {
        enrich::enrich_data(table, refs, opts, diagnostics)?;
    }
    Ok(())
}

fn default_output(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{}_{}.csv", stem, suffix))
}

/// Write the table and the optional JSON summary, then print previews.
fn export(
    table: &Table,
    diagnostics: &Diagnostics,
    output_path: &Path,
    summary_path: Option<&Path>,
) -> Result<()> {
    output::write_csv(output_path, table)
        .with_context(|| format!("writing {}", output_path.display()))?;
    if let Some(path) = summary_path {
        output::write_json(path, &RunSummary::new(table, diagnostics))
            .with_context(|| format!("writing {}", path.display()))?;
    }
    output::preview_table("Preview", table, PREVIEW_ROWS);
    output::preview_summary(diagnostics);
    println!("(Full table exported to {})", output_path.display());
    if let Some(path) = summary_path {
        println!("(Warnings exported to {})", path.display());
    }
    Ok(())
}

fn run_file(input: &Path, stage: Stage, common: &CommonArgs) -> Result<()> {
    let opts = common.options()?;
    let refs = ReferenceData::load(&opts).context("loading reference data")?;
    let mut table =
        loader::read_table(input).with_context(|| format!("reading {}", input.display()))?;
    let mut diagnostics = Diagnostics::new();
    run_stages(&mut table, stage, &refs, &opts, &mut diagnostics)?;
    if diagnostics.is_empty() {
        info!("{} finished without warnings", stage.suffix());
    } else {
        info!(
            "{} finished with {} warnings",
            stage.suffix(),
            diagnostics.len()
        );
    }
    if diagnostics.has(WarningKind::ColumnsNotDetected) {
        info!("unknown columns can be mapped with --fields or [field_aliases] in --config");
    }
    let output_path = common
        .output
        .clone()
        .unwrap_or_else(|| default_output(input, stage.suffix()));
    export(&table, &diagnostics, &output_path, common.summary.as_deref())
}

fn run_combine(inputs: &[PathBuf], output_path: &Path, summary: Option<&Path>) -> Result<()> {
    let mut diagnostics = Diagnostics::new();
    let table = loader::combine_data(inputs, &mut diagnostics)?;
    info!(
        "Combined {} rows from {} inputs",
        util::format_int(table.n_rows()),
        inputs.len()
    );
    export(&table, &diagnostics, output_path, summary)
}

// Simple in-memory app state so a file is loaded and renamed once but can
// be cleaned and exported repeatedly in a single run.
static APP_STATE: Lazy<Mutex<AppState>> = Lazy::new(|| Mutex::new(AppState::default()));

#[derive(Default)]
struct AppState {
    data: Option<Loaded>,
}

struct Loaded {
    path: PathBuf,
    table: Table,
    diagnostics: Diagnostics,
}

fn app_state() -> MutexGuard<'static, AppState> {
    APP_STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Print `label` and read one trimmed line of input.
fn read_line(label: &str) -> String {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Ask the user whether to go back to the menu after exporting.
///
/// Returns `true` if the user chose `Y`, `false` if they chose `N`.
fn prompt_back_to_menu() -> bool {
    loop {
        let resp = read_line("Back to menu (Y/N): ").to_uppercase();
        match resp.as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Handle option [1]: load a file and standardize its column names.
fn handle_load(opts: &Options, refs: &ReferenceData) {
    let path = PathBuf::from(read_line("File to load: "));
    let mut diagnostics = Diagnostics::new();
    let loaded = loader::read_table(&path).and_then(|mut table| {
        change_names::change_names(&mut table, refs, opts, &mut diagnostics)?;
        Ok(table)
    });
    match loaded {
        Ok(table) => {
            println!(
                "Loaded {} ({} rows, {} columns, {} warnings)\n",
                path.display(),
                util::format_int(table.n_rows()),
                table.n_cols(),
                diagnostics.len()
            );
            output::preview_table("Standardized columns", &table, PREVIEW_ROWS);
            app_state().data = Some(Loaded {
                path,
                table,
                diagnostics,
            });
        }
        Err(e) => eprintln!("Failed to load file: {}\n", e),
    }
}

/// Handle option [2]: clean, enrich and export the loaded data.
fn handle_export(opts: &Options, refs: &ReferenceData) {
    let Some((path, mut table, mut diagnostics)) = app_state()
        .data
        .as_ref()
        .map(|d| (d.path.clone(), d.table.clone(), d.diagnostics.clone()))
    else {
        println!("Error: No data loaded. Please load a file first (option 1).\n");
        return;
    };

    println!("Cleaning and enriching...\n");
    let result = clean::clean_data(&mut table, refs, opts, &mut diagnostics)
        .and_then(|_| enrich::enrich_data(&mut table, refs, opts, &mut diagnostics));
    if let Err(e) = result {
        eprintln!("Processing failed: {}\n", e);
        return;
    }
    let output_path = default_output(&path, Stage::Process.suffix());
    if let Err(e) = export(&table, &diagnostics, &output_path, Some(Path::new("summary.json"))) {
        eprintln!("Write error: {:#}", e);
    }
}

fn interactive() -> Result<()> {
    let opts = Options::default();
    let refs = ReferenceData::load(&opts).context("loading reference data")?;
    loop {
        println!("Select an action:");
        println!("[1] Load the file");
        println!("[2] Clean, enrich and export\n");
        match read_line("Enter choice: ").as_str() {
            "1" => handle_load(&opts, &refs),
            "2" => {
                println!();
                handle_export(&opts, &refs);
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    break;
                }
            }
            _ => println!("Invalid choice. Please enter 1 or 2.\n"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    match cli.command {
        None => interactive(),
        Some(Commands::Rename { input, common }) => run_file(&input, Stage::Rename, &common),
        Some(Commands::Clean { input, common }) => run_file(&input, Stage::Clean, &common),
        Some(Commands::Enrich { input, common }) => run_file(&input, Stage::Enrich, &common),
        Some(Commands::Process { input, common }) => run_file(&input, Stage::Process, &common),
        Some(Commands::Combine {
            inputs,
            output,
            summary,
        }) => run_combine(&inputs, &output, summary.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "osta",
            "clean",
            "in.csv",
            "--no-guess",
            "--match-th",
            "0.6",
            "--db-year",
            "2021,2022",
        ]);
        let Some(Commands::Clean { input, common }) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(input, PathBuf::from("in.csv"));
        let opts = common.options().unwrap();
        assert!(!opts.guess_names);
        assert_eq!(opts.match_th, 0.6);
        assert_eq!(opts.db_year, Some(vec![2021, 2022]));
    }

    #[test]
    fn flags_are_validated() {
        let common = CommonArgs {
            pattern_th: Some(3.0),
            ..CommonArgs::default()
        };
        assert!(common.options().is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output(Path::new("data/invoices.xlsx"), "cleaned"),
            PathBuf::from("data/invoices_cleaned.csv")
        );
    }

    #[test]
    fn processes_a_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("invoices.csv");
        std::fs::write(
            &input,
            "Kunnan nimi;Kuntanumero;Toimittaja;Test;Summa;ALV;Veroton summa\n\
             turku;853;Acme Oy;1.2.2023;12,40;2,40;10\n\
             Turku;853;Beta Oy;15.2.2023;25;5;20\n",
        )
        .unwrap();
        let output = dir.path().join("out.csv");
        let summary = dir.path().join("summary.json");
        let common = CommonArgs {
            output: Some(output.clone()),
            summary: Some(summary.clone()),
            ..CommonArgs::default()
        };
        run_file(&input, Stage::Process, &common).unwrap();

        let written = loader::read_table(&output).unwrap();
        let name = written.col_index("org_name").unwrap();
        assert_eq!(written.get(0, name), Some("Turku"));
        let date = written.col_index("date").unwrap();
        assert_eq!(written.get(1, date), Some("15-02-2023"));
        assert!(written.has_column("org_bid"));
        assert!(summary.exists());
    }
}
