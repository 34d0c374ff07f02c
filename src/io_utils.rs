//! Encoding and CSV reader helpers for delimited exports.
//!
//! Workbook formats go through calamine; plain CSV exports are read here as
//! raw byte records and decoded with `encoding_rs`, defaulting to UTF-8.

use std::io::Read;

use anyhow::{Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn delimiter_for_extension(extension: &str) -> u8 {
    if extension.eq_ignore_ascii_case("tsv") {
        DEFAULT_TSV_DELIMITER
    } else {
        DEFAULT_CSV_DELIMITER
    }
}

/// Header handling is left to the layout locator, so every record is data
/// here. Ragged rows are common in hand-edited exports and are accepted.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    // `decode` strips a BOM, which only the first field of a file can carry.
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn unknown_encoding_labels_are_rejected() {
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(resolve_encoding(Some(" latin1 ")).unwrap(), WINDOWS_1252);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn ragged_records_are_read_without_headers() {
        let data = "SKU,Title\nA-1\nA-2,Emma,extra\n";
        let mut reader = open_csv_reader(data.as_bytes(), DEFAULT_CSV_DELIMITER);
        let lengths: Vec<usize> = reader
            .byte_records()
            .map(|record| record.unwrap().len())
            .collect();
        assert_eq!(lengths, vec![2, 1, 3]);
    }

    #[test]
    fn legacy_encodings_decode_currency_symbols() {
        let record = csv::ByteRecord::from(vec![&b"\xa39.99"[..]]);
        let decoded = decode_record(&record, WINDOWS_1252).unwrap();
        assert_eq!(decoded, vec!["£9.99".to_string()]);
        assert!(decode_record(&record, UTF_8).is_err());
    }

    #[test]
    fn tab_separated_exports_use_tabs() {
        assert_eq!(delimiter_for_extension("TSV"), b'\t');
        assert_eq!(delimiter_for_extension("csv"), b',');
    }
}
