#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use tempfile::{TempDir, tempdir};

/// A cell written into an xlsx fixture.
#[derive(Debug, Clone, Copy)]
pub enum Fixture<'a> {
    Text(&'a str),
    Number(f64),
    /// Year, month, day, written as a date-formatted serial.
    Date(u16, u8, u8),
    Skip,
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Writes a workbook with one worksheet per `(name, rows)` entry.
    /// `origin` shifts every sheet's first written cell to `(row, col)`.
    pub fn write_xlsx(
        &self,
        name: &str,
        sheets: &[(&str, Vec<Vec<Fixture<'_>>>)],
        origin: (u32, u16),
    ) -> PathBuf {
        let path = self.join(name);
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let mut workbook = Workbook::new();
        for (sheet_name, rows) in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(*sheet_name).expect("sheet name");
            for (r, cells) in rows.iter().enumerate() {
                let row = origin.0 + r as u32;
                for (c, cell) in cells.iter().enumerate() {
                    let col = origin.1 + c as u16;
                    match cell {
                        Fixture::Text(text) => {
                            worksheet.write_string(row, col, *text).expect("write text");
                        }
                        Fixture::Number(value) => {
                            worksheet.write_number(row, col, *value).expect("write number");
                        }
                        Fixture::Date(y, m, d) => {
                            let date = ExcelDateTime::from_ymd(*y, *m, *d).expect("valid date");
                            worksheet
                                .write_datetime_with_format(row, col, &date, &date_format)
                                .expect("write date");
                        }
                        Fixture::Skip => {}
                    }
                }
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }

    pub fn file_names(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
