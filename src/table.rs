//! Plain-text tables for summaries and reports.

use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub title: String,
    pub align: Align,
}

impl Column {
    pub fn left(title: &str) -> Self {
        Self {
            title: title.to_string(),
            align: Align::Left,
        }
    }

    /// Right-aligned, for counts and amounts.
    pub fn right(title: &str) -> Self {
        Self {
            title: title.to_string(),
            align: Align::Right,
        }
    }
}

pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns
        .iter()
        .map(|column| display_width(&column.title).max(1))
        .collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(columns.len()) {
            widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
        }
    }

    let mut output = String::new();
    let titles: Vec<String> = columns.iter().map(|column| column.title.clone()).collect();
    let _ = writeln!(output, "{}", format_row(&titles, columns, &widths));
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    let _ = writeln!(output, "{}", format_row(&rule, columns, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, columns, &widths));
    }
    output
}

pub fn print_table(columns: &[Column], rows: &[Vec<String>]) {
    print!("{}", render_table(columns, rows));
}

/// Two-column key/value listing, used for single summaries.
pub fn render_pairs(pairs: &[(&str, String)]) -> String {
    let width = pairs
        .iter()
        .map(|(label, _)| display_width(label))
        .max()
        .unwrap_or_default();
    let mut output = String::new();
    for (label, value) in pairs {
        let padding = width.saturating_sub(display_width(label));
        let _ = writeln!(
            output,
            "{label}:{} {}",
            " ".repeat(padding),
            sanitize_cell(value)
        );
    }
    output
}

fn format_row(values: &[String], columns: &[Column], widths: &[usize]) -> String {
    let cells: Vec<String> = values
        .iter()
        .zip(columns.iter().zip(widths))
        .map(|(value, (column, width))| {
            let text = sanitize_cell(value);
            let padding = " ".repeat(width.saturating_sub(display_width(&text)));
            match column.align {
                Align::Left => format!("{text}{padding}"),
                Align::Right => format!("{padding}{text}"),
            }
        })
        .collect();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
