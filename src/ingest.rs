//! One upload, start to finish.
//!
//! The orchestrator reads the selected sheet of an [`Upload`], locates the
//! header row, pushes every data row through resolution, normalization and
//! reconciliation, and folds the outcomes into an [`IngestSummary`]. Rows are
//! persisted one by one; a failing row never rolls back the rows before it.
//!
//! The upload file is owned by the [`Upload`] guard, which is dropped when
//! [`ingest`] returns. That removes the file whether the run succeeded,
//! rejected rows, or failed outright.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    entity::{EntityKind, IngestMode},
    error::{FieldTableError, IngestError},
    fields::FieldTable,
    layout::{HEADER_SCAN_ROWS, HeaderLocator, LayoutChoice, SheetLayout},
    normalize::Normalizer,
    reconcile::{Outcome, Reconciler, Rejection},
    resolve::RawRow,
    store::RecordStore,
    workbook::{ReadOptions, read_sheet},
};

/// Row errors kept verbatim in a summary; the rest are only counted.
pub const ERROR_SAMPLE_LIMIT: usize = 5;

/// A transient upload file, deleted when the guard goes out of scope.
#[derive(Debug)]
pub struct Upload {
    path: PathBuf,
    source: String,
}

impl Upload {
    /// Copies `source` into `staging_dir` under a fresh unique name that keeps
    /// the original extension.
    pub fn stage(source: &Path, staging_dir: &Path) -> Result<Self> {
        fs::create_dir_all(staging_dir)
            .with_context(|| format!("Creating staging directory {staging_dir:?}"))?;
        let mut name = Uuid::new_v4().to_string();
        if let Some(extension) = source.extension().and_then(|ext| ext.to_str()) {
            name.push('.');
            name.push_str(extension);
        }
        let path = staging_dir.join(name);
        fs::copy(source, &path)
            .with_context(|| format!("Staging {source:?} into {staging_dir:?}"))?;
        debug!("Staged {source:?} as {path:?}");
        Ok(Self {
            path,
            source: display_name(source),
        })
    }

    /// Takes ownership of an existing file; it is removed like a staged copy.
    pub fn adopt(path: PathBuf) -> Self {
        let source = display_name(&path);
        Self { path, source }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the original upload, for reporting.
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Drop for Upload {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed upload file {:?}", self.path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove upload file {:?}: {err}", self.path),
        }
    }
}

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub kind: EntityKind,
    pub table: FieldTable,
    /// Explicit mode; falls back to the field table's default, then merge.
    pub mode: Option<IngestMode>,
    pub layout: LayoutChoice,
    pub read: ReadOptions,
}

impl IngestJob {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            table: FieldTable::builtin(kind),
            mode: None,
            layout: LayoutChoice::default(),
            read: ReadOptions::default(),
        }
    }

    pub fn effective_mode(&self) -> IngestMode {
        self.mode.or(self.table.mode).unwrap_or_default()
    }

    fn check_table(&self) -> Result<(), IngestError> {
        let fail = |source| IngestError::FieldTable {
            kind: self.kind.to_string(),
            source,
        };
        if self.table.kind != self.kind {
            return Err(fail(FieldTableError::KindMismatch {
                expected: self.kind.to_string(),
                found: self.table.kind.to_string(),
            }));
        }
        self.table.validate().map_err(fail)
    }
}

/// A sampled row-level failure: an undecodable row or a storage error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// One-based sheet row number.
    pub row: usize,
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub kind: EntityKind,
    pub source: String,
    pub sheet: String,
    pub layout: SheetLayout,
    pub mode: IngestMode,
    /// Data rows seen, blank ones included.
    pub total_rows: usize,
    pub blank_rows: usize,
    pub new: usize,
    pub updated: usize,
    pub duplicates: usize,
    /// Rows without a usable natural key.
    pub rejected: usize,
    /// Rows that could not be decoded or failed in storage.
    pub errors: usize,
    pub error_sample: Vec<RowError>,
}

impl IngestSummary {
    fn new(kind: EntityKind, source: &str, sheet: &str, layout: SheetLayout, mode: IngestMode) -> Self {
        Self {
            kind,
            source: source.to_string(),
            sheet: sheet.to_string(),
            layout,
            mode,
            total_rows: 0,
            blank_rows: 0,
            new: 0,
            updated: 0,
            duplicates: 0,
            rejected: 0,
            errors: 0,
            error_sample: Vec::new(),
        }
    }

    /// Rows that were written, one way or another.
    pub fn stored(&self) -> usize {
        self.new + self.updated
    }

    fn record_error(&mut self, row: usize, key: Option<String>, message: String) {
        self.errors += 1;
        if self.error_sample.len() < ERROR_SAMPLE_LIMIT {
            warn!("Row {row}: {message}");
            self.error_sample.push(RowError { row, key, message });
        }
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows from '{}' ({}): {} new, {} updated, {} duplicate, {} rejected, {} error(s), {} blank",
            self.total_rows,
            self.source,
            self.kind,
            self.new,
            self.updated,
            self.duplicates,
            self.rejected,
            self.errors,
            self.blank_rows
        )
    }
}

/// Runs `job` over `upload` using the job's layout choice.
pub fn ingest<S: RecordStore + ?Sized>(
    store: &S,
    upload: Upload,
    job: &IngestJob,
) -> Result<IngestSummary, IngestError> {
    let locator = job.layout.locator();
    ingest_with(store, upload, job, locator.as_ref())
}

/// Runs `job` over `upload` with a caller-supplied header locator.
pub fn ingest_with<S: RecordStore + ?Sized>(
    store: &S,
    upload: Upload,
    job: &IngestJob,
    locator: &dyn HeaderLocator,
) -> Result<IngestSummary, IngestError> {
    job.check_table()?;
    let mode = job.effective_mode();
    info!(
        "Ingesting '{}' as {} ({mode} mode)",
        upload.source(),
        job.kind
    );
    let sheet = read_sheet(upload.path(), &job.read)?;

    let scan = &sheet.rows[..sheet.rows.len().min(HEADER_SCAN_ROWS)];
    let layout = locator.locate(scan, &job.table);
    debug!("Sheet '{}' layout: {layout}", sheet.name);
    let headers: Vec<String> = match layout {
        SheetLayout::HeaderAt(row) => sheet
            .rows
            .get(row)
            .map(|cells| cells.iter().map(|cell| cell.as_label()).collect())
            .unwrap_or_default(),
        SheetLayout::Positional => Vec::new(),
    };

    let normalizer = Normalizer::new(&job.table);
    let reconciler = Reconciler::new(store);
    let mut summary = IngestSummary::new(job.kind, upload.source(), &sheet.name, layout, mode);

    for (idx, cells) in sheet.rows.iter().enumerate().skip(layout.first_data_row()) {
        let row_number = idx + 1;
        summary.total_rows += 1;
        if let Some(message) = sheet.unreadable.get(&idx) {
            summary.record_error(row_number, None, message.clone());
            continue;
        }
        let raw = match layout {
            SheetLayout::HeaderAt(_) => RawRow::labeled(&headers, cells),
            SheetLayout::Positional => RawRow::Positional(cells.clone()),
        };
        if raw.is_blank() {
            summary.blank_rows += 1;
            continue;
        }

        let record = normalizer.record(&raw);
        let reconciled = reconciler.reconcile(&record, mode);
        match reconciled.outcome {
            Outcome::New => summary.new += 1,
            Outcome::Updated => summary.updated += 1,
            Outcome::Rejected(Rejection::MissingKey) => {
                debug!("Row {row_number}: rejected, no natural key");
                summary.rejected += 1;
            }
            Outcome::Rejected(Rejection::Duplicate) => summary.duplicates += 1,
            Outcome::Rejected(Rejection::Storage(message)) => {
                let key = reconciled.key.map(|key| key.to_string());
                summary.record_error(row_number, key, message);
            }
        }
    }

    info!("Finished: {summary}");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        entity::{NaturalKey, NormalizedRecord},
        error::StoreError,
        layout::FixedLocator,
        store::{SqliteStore, Upserted},
    };
    use tempfile::tempdir;

    fn write_upload(dir: &Path, name: &str, contents: &str) -> Upload {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write upload");
        Upload::adopt(path)
    }

    #[test]
    fn merge_scenario_counts_new_rejected_and_updated() {
        let dir = tempdir().expect("temp dir");
        let upload = write_upload(
            dir.path(),
            "catalog.csv",
            "sku,price\nABC-123,£5.00\n,£1.00\nABC-123,£7.00\n",
        );
        let path = upload.path().to_path_buf();
        let store = SqliteStore::open_in_memory().expect("store");

        let summary = ingest(&store, upload, &IngestJob::new(EntityKind::Catalog)).expect("ingest");
        assert_eq!(summary.layout, SheetLayout::HeaderAt(0));
        assert_eq!((summary.new, summary.rejected, summary.updated), (1, 1, 1));
        assert_eq!(summary.total_rows, 3);
        assert!(!path.exists(), "upload file removed");

        let stored = store
            .find(EntityKind::Catalog, &NaturalKey(vec!["ABC123".to_string()]))
            .expect("find")
            .expect("stored");
        assert_eq!(stored.record.get("list_price").to_string(), "7.00");
    }

    #[test]
    fn blank_rows_are_counted_and_skipped() {
        let dir = tempdir().expect("temp dir");
        let upload = write_upload(dir.path(), "catalog.csv", "SKU,Title\nA1,Dune\n,\nA2,Emma\n");
        let store = SqliteStore::open_in_memory().expect("store");
        let summary = ingest(&store, upload, &IngestJob::new(EntityKind::Catalog)).expect("ingest");
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.blank_rows, 1);
        assert_eq!(summary.new, 2);
    }

    #[test]
    fn fatal_errors_still_remove_the_upload() {
        let dir = tempdir().expect("temp dir");
        let upload = write_upload(dir.path(), "catalog.xlsx", "definitely not a workbook");
        let path = upload.path().to_path_buf();
        let store = SqliteStore::open_in_memory().expect("store");

        let err = ingest(&store, upload, &IngestJob::new(EntityKind::Catalog)).unwrap_err();
        assert!(matches!(err, IngestError::OpenWorkbook { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn field_table_for_another_kind_is_fatal() {
        let dir = tempdir().expect("temp dir");
        let upload = write_upload(dir.path(), "catalog.csv", "SKU\nA1\n");
        let store = SqliteStore::open_in_memory().expect("store");
        let mut job = IngestJob::new(EntityKind::Catalog);
        job.table = FieldTable::builtin(EntityKind::Sales);
        assert!(matches!(
            ingest(&store, upload, &job),
            Err(IngestError::FieldTable { .. })
        ));
    }

    #[test]
    fn explicit_mode_beats_table_default() {
        let mut job = IngestJob::new(EntityKind::Sales);
        assert_eq!(job.effective_mode(), IngestMode::Merge);
        job.table.mode = Some(IngestMode::Append);
        assert_eq!(job.effective_mode(), IngestMode::Append);
        job.mode = Some(IngestMode::Merge);
        assert_eq!(job.effective_mode(), IngestMode::Merge);
    }

    #[test]
    fn positional_layout_reads_every_row_as_data() {
        let dir = tempdir().expect("temp dir");
        let upload = write_upload(dir.path(), "catalog.csv", "A-1,978-0-14-103614-4,Dune\nA-2,,Emma\n");
        let store = SqliteStore::open_in_memory().expect("store");
        let summary = ingest_with(
            &store,
            upload,
            &IngestJob::new(EntityKind::Catalog),
            &FixedLocator(SheetLayout::Positional),
        )
        .expect("ingest");
        assert_eq!(summary.new, 2);

        let stored = store
            .find(EntityKind::Catalog, &NaturalKey(vec!["A1".to_string()]))
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.record.get("isbn"),
            &Value::Text("9780141036144".to_string())
        );
    }

    /// Fails every write with a distinct message.
    struct FlakyStore;

    impl RecordStore for FlakyStore {
        fn upsert(&self, record: &NormalizedRecord) -> Result<Upserted, StoreError> {
            Err(StoreError::Corrupt {
                column: "sku".to_string(),
                value: record.get("sku").to_string(),
                expected: "text",
            })
        }

        fn insert(&self, _record: &NormalizedRecord) -> Result<i64, StoreError> {
            Ok(1)
        }

        fn clear(&self, _kind: EntityKind) -> Result<usize, StoreError> {
            Ok(0)
        }

        fn count(&self, _kind: EntityKind) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn storage_errors_are_counted_but_only_sampled() {
        let dir = tempdir().expect("temp dir");
        let body: String = (1..=8).map(|idx| format!("S{idx},Title {idx}\n")).collect();
        let upload = write_upload(dir.path(), "catalog.csv", &format!("SKU,Title\n{body}"));
        let path = upload.path().to_path_buf();
        let summary = ingest(&FlakyStore, upload, &IngestJob::new(EntityKind::Catalog)).expect("ingest");

        assert!(!path.exists(), "upload file removed after row failures");
        assert_eq!(summary.errors, 8);
        assert_eq!(summary.error_sample.len(), ERROR_SAMPLE_LIMIT);
        let first = &summary.error_sample[0];
        assert_eq!(first.row, 2);
        assert_eq!(first.key.as_deref(), Some("S1"));
        assert!(first.message.contains("\"S1\""), "{}", first.message);
    }

    #[test]
    fn undecodable_rows_do_not_stop_the_upload() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("catalog.csv");
        let mut body = b"SKU,Title\nA-1,Dune\nA-2,Emma\nA-3,Caf\xe9\n".to_vec();
        for idx in 4..=10 {
            body.extend_from_slice(format!("A-{idx},Title {idx}\n").as_bytes());
        }
        fs::write(&path, body).expect("write upload");
        let store = SqliteStore::open_in_memory().expect("store");

        let summary = ingest(&store, Upload::adopt(path.clone()), &IngestJob::new(EntityKind::Catalog))
            .expect("ingest");
        assert_eq!(summary.total_rows, 10);
        assert_eq!(summary.new, 9);
        assert_eq!(summary.errors, 1);
        let sampled = &summary.error_sample[0];
        assert_eq!(sampled.row, 4);
        assert_eq!(sampled.key, None);
        assert!(sampled.message.contains("UTF-8"), "{}", sampled.message);
        assert_eq!(store.count(EntityKind::Catalog).expect("count"), 9);
        assert!(!path.exists());
    }

    #[test]
    fn staging_copies_and_cleans_up() {
        let dir = tempdir().expect("temp dir");
        let source = dir.path().join("orders.csv");
        fs::write(&source, "x").expect("write source");
        let staging = dir.path().join("staging");

        let upload = Upload::stage(&source, &staging).expect("stage");
        let staged = upload.path().to_path_buf();
        assert_eq!(upload.source(), "orders.csv");
        assert_eq!(staged.extension().and_then(|ext| ext.to_str()), Some("csv"));
        assert!(staged.exists());
        drop(upload);
        assert!(!staged.exists());
        assert!(source.exists(), "original is left alone");
    }
}
