use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    entity::{EntityKind, IngestMode},
    layout::LayoutChoice,
    report::ReportKind,
    workbook::DateCells,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest book-trade catalog and sales spreadsheets into a relational store",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest one catalog or sales spreadsheet export
    Ingest(IngestArgs),
    /// Delete every stored record of one kind
    Clear(ClearArgs),
    /// Print an aggregate report over the stored data
    Report(ReportArgs),
    /// Show the effective field table for a kind, or export it as YAML
    Fields(FieldsArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Kind of export being ingested
    #[arg(value_enum)]
    pub kind: EntityKind,
    /// Spreadsheet to ingest (.xlsx, .xlsm, .xlsb, .xls, .ods, .csv, .tsv)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// SQLite database file; created when missing
    #[arg(long)]
    pub db: PathBuf,
    /// Collision handling; defaults to the field table's mode, then merge
    #[arg(long, value_enum)]
    pub mode: Option<IngestMode>,
    /// YAML field table replacing the built-in one for this kind
    #[arg(long = "fields")]
    pub fields: Option<PathBuf>,
    /// Sheet to read (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Header row detection
    #[arg(long, value_enum, default_value_t = LayoutChoice::Auto)]
    pub layout: LayoutChoice,
    /// How date-formatted workbook cells are read
    #[arg(long = "date-cells", value_enum, default_value_t = DateCells::Native)]
    pub date_cells: DateCells,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Directory the upload is staged in (defaults to the system temp dir)
    #[arg(long = "staging-dir")]
    pub staging_dir: Option<PathBuf>,
    /// Ingest the input in place and delete it afterwards instead of staging a copy
    #[arg(long)]
    pub consume: bool,
    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Kind of records to delete
    #[arg(value_enum)]
    pub kind: EntityKind,
    /// SQLite database file
    #[arg(long)]
    pub db: PathBuf,
    /// Confirm the irreversible delete
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Report to produce
    #[arg(value_enum)]
    pub report: ReportKind,
    /// SQLite database file
    #[arg(long)]
    pub db: PathBuf,
    /// Maximum number of rows to print
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    /// Kind whose field table is shown
    #[arg(value_enum)]
    pub kind: EntityKind,
    /// YAML field table to validate and show instead of the built-in one
    #[arg(long = "fields")]
    pub fields: Option<PathBuf>,
    /// Write the effective table to this YAML file
    #[arg(long)]
    pub export: Option<PathBuf>,
}
