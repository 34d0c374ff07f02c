pub mod cli;
pub mod data;
pub mod entity;
pub mod error;
pub mod fields;
pub mod ingest;
pub mod io_utils;
pub mod layout;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod resolve;
pub mod store;
pub mod table;
pub mod workbook;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    entity::EntityKind,
    fields::FieldTable,
    ingest::{IngestJob, IngestSummary, Upload},
    io_utils::resolve_encoding,
    report::Report,
    store::{RecordStore, SqliteStore},
    table::{print_table, render_pairs},
    workbook::ReadOptions,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("booktrade_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Clear(args) => handle_clear(&args),
        Commands::Report(args) => handle_report(&args),
        Commands::Fields(args) => handle_fields(&args),
    }
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("Opening database {path:?}"))
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    if !args.input.is_file() {
        bail!("Input file {:?} does not exist", args.input);
    }
    // A consumed input is removed on every exit path, configuration errors included.
    let consumed = args.consume.then(|| Upload::adopt(args.input.clone()));
    let table = FieldTable::resolve(args.kind, args.fields.as_deref())?;
    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    let job = IngestJob {
        kind: args.kind,
        table,
        mode: args.mode,
        layout: args.layout,
        read: ReadOptions {
            sheet: args.sheet.clone(),
            date_cells: args.date_cells,
            encoding,
        },
    };
    let store = open_store(&args.db)?;

    let upload = match consumed {
        Some(upload) => upload,
        None => {
            let staging_dir = args.staging_dir.clone().unwrap_or_else(env::temp_dir);
            Upload::stage(&args.input, &staging_dir)?
        }
    };
    debug!("Upload staged at {:?}", upload.path());

    let summary = ingest::ingest(&store, upload, &job)
        .with_context(|| format!("Ingesting {:?}", args.input))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    let pairs = [
        ("source", summary.source.clone()),
        ("kind", summary.kind.to_string()),
        ("sheet", summary.sheet.clone()),
        ("layout", summary.layout.to_string()),
        ("mode", summary.mode.to_string()),
        ("rows", summary.total_rows.to_string()),
        ("blank", summary.blank_rows.to_string()),
        ("new", summary.new.to_string()),
        ("updated", summary.updated.to_string()),
        ("duplicates", summary.duplicates.to_string()),
        ("rejected", summary.rejected.to_string()),
        ("errors", summary.errors.to_string()),
    ];
    print!("{}", render_pairs(&pairs));
    for sample in &summary.error_sample {
        println!(
            "  row {} [{}]: {}",
            sample.row,
            sample.key.as_deref().unwrap_or("-"),
            sample.message
        );
    }
}

fn handle_clear(args: &cli::ClearArgs) -> Result<()> {
    if !args.yes {
        bail!(
            "Refusing to delete all {} records without --yes",
            args.kind
        );
    }
    let store = open_store(&args.db)?;
    let deleted = store
        .clear(args.kind)
        .with_context(|| format!("Clearing {} records", args.kind))?;
    println!("Deleted {deleted} {} record(s)", args.kind);
    Ok(())
}

fn handle_report(args: &cli::ReportArgs) -> Result<()> {
    let store = open_store(&args.db)?;
    let report = Report::build(&store, args.report, args.limit)
        .with_context(|| format!("Building {:?} report", args.report))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_empty() {
        info!("No data for the requested report");
    } else {
        print_table(&report.columns(), &report.rows());
    }
    Ok(())
}

fn handle_fields(args: &cli::FieldsArgs) -> Result<()> {
    let table = FieldTable::resolve(args.kind, args.fields.as_deref())?;
    if let Some(path) = &args.export {
        table.save(path)?;
        info!(
            "Field table for {} with {} field(s) written to {:?}",
            args.kind,
            table.fields.len(),
            path
        );
        return Ok(());
    }
    print_fields(args.kind, &table);
    Ok(())
}

fn print_fields(kind: EntityKind, table: &FieldTable) {
    let columns = [
        table::Column::left("field"),
        table::Column::left("kind"),
        table::Column::right("position"),
        table::Column::left("key"),
        table::Column::left("aliases"),
    ];
    let rows: Vec<Vec<String>> = table
        .fields
        .iter()
        .map(|field| {
            let key = kind
                .key_parts()
                .iter()
                .find(|part| part.column == field.name)
                .map(|part| if part.required { "required" } else { "optional" })
                .unwrap_or_default();
            vec![
                field.name.clone(),
                field.kind.to_string(),
                field.position.map(|p| p.to_string()).unwrap_or_default(),
                key.to_string(),
                field.aliases.join(", "),
            ]
        })
        .collect();
    print_table(&columns, &rows);
}
