//! Header-row detection.
//!
//! Exports from the sales platform sometimes carry a title row above the
//! header, and older catalog dumps have no header at all. A [`HeaderLocator`]
//! looks at the top of a sheet and decides which of those shapes it has.

use std::fmt;

use clap::ValueEnum;
use log::debug;
use serde::Serialize;

use crate::{data::Cell, fields::FieldTable};

/// Number of leading rows a locator may inspect.
pub const HEADER_SCAN_ROWS: usize = 2;

/// Where the header sits, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "layout", content = "row")]
pub enum SheetLayout {
    /// Header labels on this zero-based row; data starts on the next one.
    HeaderAt(usize),
    /// No usable header; every row is data and fields resolve by position.
    Positional,
}

impl SheetLayout {
    /// Zero-based index of the first data row.
    pub fn first_data_row(&self) -> usize {
        match self {
            SheetLayout::HeaderAt(row) => row + 1,
            SheetLayout::Positional => 0,
        }
    }
}

impl fmt::Display for SheetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetLayout::HeaderAt(row) => write!(f, "header at row {row}"),
            SheetLayout::Positional => f.write_str("positional"),
        }
    }
}

pub trait HeaderLocator {
    /// Inspects `rows` (the first rows of the sheet, at most
    /// [`HEADER_SCAN_ROWS`]) and picks a layout.
    fn locate(&self, rows: &[Vec<Cell>], table: &FieldTable) -> SheetLayout;
}

/// Scores the candidate rows by how many fields of the table they name.
#[derive(Debug, Clone, Copy)]
pub struct AliasMatchLocator {
    /// Fields a row must name before it is accepted as a header.
    pub min_hits: usize,
}

impl Default for AliasMatchLocator {
    fn default() -> Self {
        Self { min_hits: 2 }
    }
}

impl AliasMatchLocator {
    /// Counts table fields with at least one alias present in `row`.
    pub fn score(row: &[Cell], table: &FieldTable) -> usize {
        let labels: Vec<String> = row
            .iter()
            .filter(|cell| !cell.is_blank())
            .map(Cell::as_label)
            .collect();
        if labels.is_empty() {
            return 0;
        }
        table
            .fields
            .iter()
            .filter(|field| {
                field.aliases.iter().any(|alias| {
                    labels
                        .iter()
                        .any(|label| table.label_matching.matches(label, alias))
                })
            })
            .count()
    }
}

impl HeaderLocator for AliasMatchLocator {
    fn locate(&self, rows: &[Vec<Cell>], table: &FieldTable) -> SheetLayout {
        // A single-field table can never reach the default threshold.
        let threshold = self.min_hits.min(table.fields.len()).max(1);
        let scores: Vec<usize> = rows
            .iter()
            .take(HEADER_SCAN_ROWS)
            .map(|row| Self::score(row, table))
            .collect();
        debug!("Header scores for first rows: {scores:?} (threshold {threshold})");

        let best = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score >= threshold)
            // Ties go to the earlier row.
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)));
        match best {
            Some((row, _)) => SheetLayout::HeaderAt(row),
            None => SheetLayout::Positional,
        }
    }
}

/// Always returns the configured layout.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocator(pub SheetLayout);

impl HeaderLocator for FixedLocator {
    fn locate(&self, _rows: &[Vec<Cell>], _table: &FieldTable) -> SheetLayout {
        self.0
    }
}

/// Layout selection as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LayoutChoice {
    /// Detect the header row from the field table's aliases.
    #[default]
    Auto,
    /// Header on the first row.
    Row0,
    /// Title row first, header on the second row.
    Row1,
    /// No header; resolve fields by column position.
    Positional,
}

impl LayoutChoice {
    pub fn locator(&self) -> Box<dyn HeaderLocator> {
        match self {
            LayoutChoice::Auto => Box::new(AliasMatchLocator::default()),
            LayoutChoice::Row0 => Box::new(FixedLocator(SheetLayout::HeaderAt(0))),
            LayoutChoice::Row1 => Box::new(FixedLocator(SheetLayout::HeaderAt(1))),
            LayoutChoice::Positional => Box::new(FixedLocator(SheetLayout::Positional)),
        }
    }
}
