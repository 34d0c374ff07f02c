//! Typed errors for the ingestion pipeline.
//!
//! Only pipeline-fatal conditions surface as [`IngestError`]. Row-level
//! problems never do: they are folded into the ingestion summary instead.

use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort a whole upload.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The upload's extension is not a spreadsheet format we can read.
    #[error("unsupported spreadsheet format {extension:?} for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The workbook could not be opened or decoded.
    #[error("failed to open workbook {path:?}: {detail}")]
    OpenWorkbook { path: PathBuf, detail: String },

    /// The workbook contains no sheets at all.
    #[error("workbook {path:?} contains no sheets")]
    NoSheets { path: PathBuf },

    /// A sheet was requested by name but is not present.
    #[error("sheet {sheet:?} not found; available sheets: {available}")]
    MissingSheet { sheet: String, available: String },

    /// A sheet was located but its cells could not be read.
    #[error("failed to read sheet {sheet:?}: {detail}")]
    ReadSheet { sheet: String, detail: String },

    #[error("field table for {kind} does not match the target store: {source}")]
    FieldTable {
        kind: String,
        #[source]
        source: FieldTableError,
    },
}

/// Storage failures reported by a [`crate::store::RecordStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert collided with an existing natural key.
    #[error("duplicate natural key: {0}")]
    UniqueViolation(String),

    /// A stored value could not be decoded back into its typed form.
    #[error("stored value {value:?} in column {column} is not a valid {expected}")]
    Corrupt {
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Sorts a raw SQLite error into a uniqueness violation or a plain failure.
    pub fn classify(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::UniqueViolation(
                    message
                        .clone()
                        .unwrap_or_else(|| "UNIQUE constraint failed".to_string()),
                )
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Problems with a field table, built in or loaded from YAML.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldTableError {
    #[error("field {field:?} is not a column of {kind}")]
    UnknownField { kind: String, field: String },

    #[error("field {0:?} is declared more than once")]
    DuplicateField(String),

    #[error("natural key field {0:?} is missing")]
    MissingKeyField(String),

    #[error("field {0:?} declares no aliases and no position")]
    Unreachable(String),

    #[error("field table is for {found}, expected {expected}")]
    KindMismatch { expected: String, found: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_unique_constraint_failures() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            Some("UNIQUE constraint failed: catalog_items.sku".to_string()),
        );
        match StoreError::classify(raw) {
            StoreError::UniqueViolation(message) => {
                assert!(message.contains("catalog_items.sku"));
            }
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[test]
    fn classify_keeps_other_failures() {
        let classified = StoreError::classify(rusqlite::Error::InvalidQuery);
        assert!(matches!(classified, StoreError::Sqlite(_)));
    }
}
