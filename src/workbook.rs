//! Spreadsheet access: turns an upload file into one sheet of [`Cell`] rows.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use calamine::{Data, Range, Reader, open_workbook_auto};
use clap::ValueEnum;
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    data::Cell,
    error::IngestError,
    io_utils::{decode_record, delimiter_for_extension, open_csv_reader},
    normalize::serial_to_date,
};

/// Extensions handed to calamine.
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
pub const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv"];

/// Name reported for the single sheet of a delimited file.
pub const DELIMITED_SHEET_NAME: &str = "csv";

/// How date-typed workbook cells are handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DateCells {
    /// Converted to calendar dates while reading.
    #[default]
    Native,
    /// Left as raw serial numbers for the normalizer to convert.
    Serial,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Sheet to read; the first sheet when `None`.
    pub sheet: Option<String>,
    pub date_cells: DateCells,
    /// Encoding of delimited files. Workbooks carry their own.
    pub encoding: &'static Encoding,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            sheet: None,
            date_cells: DateCells::default(),
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Rows in sheet order; `rows[0]` is sheet row 1.
    pub rows: Vec<Vec<Cell>>,
    /// Rows that could not be decoded, by index into `rows`. Their slot in
    /// `rows` is left empty.
    pub unreadable: BTreeMap<usize, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Workbook,
    Delimited(u8),
}

fn source_format(path: &Path) -> Result<SourceFormat, IngestError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        Ok(SourceFormat::Workbook)
    } else if DELIMITED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(SourceFormat::Delimited(delimiter_for_extension(&extension)))
    } else {
        Err(IngestError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        })
    }
}

pub fn is_supported(path: &Path) -> bool {
    source_format(path).is_ok()
}

/// Reads the selected sheet of `path`.
pub fn read_sheet(path: &Path, options: &ReadOptions) -> Result<Sheet, IngestError> {
    match source_format(path)? {
        SourceFormat::Workbook => read_workbook_sheet(path, options),
        SourceFormat::Delimited(delimiter) => read_delimited(path, delimiter, options),
    }
}

fn read_workbook_sheet(path: &Path, options: &ReadOptions) -> Result<Sheet, IngestError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| IngestError::OpenWorkbook {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    let names = workbook.sheet_names();
    let name = match &options.sheet {
        Some(requested) => names
            .iter()
            .find(|name| *name == requested)
            .cloned()
            .ok_or_else(|| IngestError::MissingSheet {
                sheet: requested.clone(),
                available: names.join(", "),
            })?,
        None => names.first().cloned().ok_or_else(|| IngestError::NoSheets {
            path: path.to_path_buf(),
        })?,
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|err| IngestError::ReadSheet {
            sheet: name.clone(),
            detail: err.to_string(),
        })?;
    let rows = padded_rows(&range, options.date_cells);
    debug!("Read {} row(s) from sheet '{}' of {path:?}", rows.len(), name);
    Ok(Sheet {
        name,
        rows,
        unreadable: BTreeMap::new(),
    })
}

/// Materializes `range` so that `rows[r][c]` is sheet cell (r, c) even when
/// the used range does not start at A1.
fn padded_rows(range: &Range<Data>, date_cells: DateCells) -> Vec<Vec<Cell>> {
    let (start_row, start_col) = range
        .start()
        .map(|(row, col)| (row as usize, col as usize))
        .unwrap_or_default();
    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    rows.extend(range.rows().map(|row| {
        std::iter::repeat_n(Cell::Blank, start_col)
            .chain(row.iter().map(|data| cell_from_data(data, date_cells)))
            .collect()
    }));
    rows
}

fn cell_from_data(data: &Data, date_cells: DateCells) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Blank,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::text(s.as_str()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            match date_cells {
                DateCells::Serial => Cell::Number(serial),
                DateCells::Native => serial_to_date(serial)
                    .map(Cell::Date)
                    .unwrap_or(Cell::Number(serial)),
            }
        }
    }
}

fn read_delimited(path: &Path, delimiter: u8, options: &ReadOptions) -> Result<Sheet, IngestError> {
    if let Some(requested) = &options.sheet
        && requested != DELIMITED_SHEET_NAME
    {
        return Err(IngestError::MissingSheet {
            sheet: requested.clone(),
            available: DELIMITED_SHEET_NAME.to_string(),
        });
    }
    let open_err = |detail: String| IngestError::OpenWorkbook {
        path: PathBuf::from(path),
        detail,
    };
    let file = File::open(path).map_err(|err| open_err(err.to_string()))?;
    let mut reader = open_csv_reader(BufReader::new(file), delimiter);
    let mut rows = Vec::new();
    let mut unreadable = BTreeMap::new();
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|err| open_err(format!("record {}: {err}", idx + 1)))?;
        match decode_record(&record, options.encoding) {
            Ok(fields) => rows.push(fields.into_iter().map(Cell::text).collect()),
            Err(err) => {
                unreadable.insert(idx, format!("{err:#}"));
                rows.push(Vec::new());
            }
        }
    }
    debug!(
        "Read {} row(s) from delimited file {path:?}, {} undecodable",
        rows.len(),
        unreadable.len()
    );
    Ok(Sheet {
        name: DELIMITED_SHEET_NAME.to_string(),
        rows,
        unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn unknown_extensions_are_unsupported() {
        let err = read_sheet(Path::new("orders.pdf"), &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { ref extension, .. } if extension == "pdf"));
        assert!(is_supported(Path::new("Orders.XLSX")));
        assert!(!is_supported(Path::new("orders")));
    }

    #[test]
    fn delimited_files_become_a_single_sheet() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("catalog.csv");
        fs::write(&path, "SKU,RRP\nA-1,£5.00\n,\n").expect("write csv");

        let sheet = read_sheet(&path, &ReadOptions::default()).expect("read csv");
        assert_eq!(sheet.name, DELIMITED_SHEET_NAME);
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.rows[1], vec![Cell::text("A-1"), Cell::text("£5.00")]);
        assert!(sheet.rows[2].iter().all(Cell::is_blank));
    }

    #[test]
    fn delimited_files_honour_the_input_encoding() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("catalog.csv");
        fs::write(&path, b"SKU,RRP\nA-1,\xa35.00\n").expect("write csv");

        let options = ReadOptions {
            encoding: WINDOWS_1252,
            ..ReadOptions::default()
        };
        let sheet = read_sheet(&path, &options).expect("read csv");
        assert_eq!(sheet.rows[1][1], Cell::text("£5.00"));
        assert!(sheet.unreadable.is_empty());

        let sheet = read_sheet(&path, &ReadOptions::default()).expect("read as utf-8");
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0], vec![Cell::text("SKU"), Cell::text("RRP")]);
        assert!(sheet.rows[1].is_empty());
        assert!(sheet.unreadable[&1].contains("UTF-8"), "{:?}", sheet.unreadable);
    }

    #[test]
    fn delimited_files_have_no_named_sheets() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("catalog.csv");
        fs::write(&path, "SKU\n").expect("write csv");
        let options = ReadOptions {
            sheet: Some("Orders".to_string()),
            ..ReadOptions::default()
        };
        assert!(matches!(
            read_sheet(&path, &options),
            Err(IngestError::MissingSheet { .. })
        ));
    }

    #[test]
    fn corrupt_workbooks_fail_to_open() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, "not a zip archive").expect("write file");
        assert!(matches!(
            read_sheet(&path, &ReadOptions::default()),
            Err(IngestError::OpenWorkbook { .. })
        ));
    }

    #[test]
    fn data_cells_map_onto_pipeline_cells() {
        assert_eq!(cell_from_data(&Data::Empty, DateCells::Native), Cell::Blank);
        assert_eq!(
            cell_from_data(&Data::Int(12), DateCells::Native),
            Cell::Number(12.0)
        );
        assert_eq!(
            cell_from_data(&Data::String("  ".to_string()), DateCells::Native),
            Cell::Blank
        );
        assert_eq!(
            cell_from_data(&Data::Bool(true), DateCells::Native),
            Cell::Text("true".to_string())
        );
    }

    #[test]
    fn padding_aligns_offset_ranges_with_sheet_coordinates() {
        let mut range: Range<Data> = Range::new((2, 1), (3, 2));
        range.set_value((2, 1), Data::String("SKU".to_string()));
        range.set_value((3, 2), Data::Float(9.5));

        let rows = padded_rows(&range, DateCells::Native);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_empty() && rows[1].is_empty());
        assert_eq!(rows[2][1], Cell::text("SKU"));
        assert_eq!(rows[3][0], Cell::Blank);
        assert_eq!(rows[3][2], Cell::Number(9.5));
    }
}
