//! Column resolution: finding a field's raw cell in a sheet row.

use crate::{
    data::Cell,
    fields::{FieldSpec, LabelMatching},
};

/// One data row of a sheet, either keyed by header label or positional.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// Header labels paired with cells, in sheet column order.
    Labeled(Vec<(String, Cell)>),
    Positional(Vec<Cell>),
}

impl RawRow {
    /// Pairs `cells` with `headers`; columns with an empty label are dropped.
    pub fn labeled(headers: &[String], cells: &[Cell]) -> Self {
        let pairs = headers
            .iter()
            .enumerate()
            .filter(|(_, label)| !label.is_empty())
            .map(|(idx, label)| (label.clone(), cells.get(idx).cloned().unwrap_or(Cell::Blank)))
            .collect();
        RawRow::Labeled(pairs)
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawRow::Labeled(pairs) => pairs.iter().all(|(_, cell)| cell.is_blank()),
            RawRow::Positional(cells) => cells.iter().all(Cell::is_blank),
        }
    }
}

/// Resolves `spec` against `row`. Never fails: `None` means absent.
///
/// Labeled rows try each alias in order and return the first non-blank cell
/// whose label matches. Positional rows return the cell at `spec.position`.
pub fn resolve<'r>(row: &'r RawRow, spec: &FieldSpec, matching: LabelMatching) -> Option<&'r Cell> {
    match row {
        RawRow::Labeled(pairs) => spec.aliases.iter().find_map(|alias| {
            pairs
                .iter()
                .find(|(label, cell)| matching.matches(label, alias) && !cell.is_blank())
                .map(|(_, cell)| cell)
        }),
        RawRow::Positional(cells) => spec
            .position
            .and_then(|idx| cells.get(idx))
            .filter(|cell| !cell.is_blank()),
    }
}
