//! Relational storage for catalog items and sales lines.
//!
//! [`RecordStore`] is the seam the reconciler writes through. [`SqliteStore`]
//! is the production implementation; it creates its tables on open and relies
//! on SQLite's atomic `INSERT ... ON CONFLICT DO UPDATE` so that concurrent
//! uploads from separate processes resolve natural-key races in the database.

use std::{path::Path, str::FromStr, time::Duration};

use chrono::NaiveDate;
use itertools::Itertools;
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::ValueRef};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    data::Value,
    entity::{EntityKind, NaturalKey, NormalizedRecord},
    error::StoreError,
    fields::{FieldKind, FieldTable},
};

/// How long a writer waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS catalog_items (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    sku              TEXT NOT NULL UNIQUE,
    isbn             TEXT,
    title            TEXT,
    author           TEXT,
    publisher        TEXT,
    format           TEXT,
    list_price       TEXT,
    cost_price       TEXT,
    discount         TEXT,
    stock            INTEGER,
    publication_date TEXT,
    revision         INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS catalog_items_isbn ON catalog_items (isbn);

CREATE TABLE IF NOT EXISTS sales_lines (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    order_ref   TEXT NOT NULL,
    line_ref    TEXT NOT NULL DEFAULT '',
    product_id  TEXT NOT NULL,
    title       TEXT,
    customer    TEXT,
    channel     TEXT,
    order_date  TEXT,
    quantity    INTEGER,
    unit_price  TEXT,
    discount    TEXT,
    net_amount  TEXT,
    tax         TEXT,
    revision    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (order_ref, line_ref, product_id)
);
CREATE INDEX IF NOT EXISTS sales_lines_product ON sales_lines (product_id);
";

/// Result of a merge-mode write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    /// `true` when the row did not exist before.
    pub created: bool,
}

pub trait RecordStore {
    /// Inserts `record`, or merges it into the row with the same natural key.
    /// Null fields in `record` never overwrite stored values.
    fn upsert(&self, record: &NormalizedRecord) -> Result<Upserted, StoreError>;

    /// Plain insert. A natural-key collision is [`StoreError::UniqueViolation`].
    fn insert(&self, record: &NormalizedRecord) -> Result<i64, StoreError>;

    /// Deletes every entity of `kind`, returning how many were removed.
    fn clear(&self, kind: EntityKind) -> Result<usize, StoreError>;

    fn count(&self, kind: EntityKind) -> Result<usize, StoreError>;
}

/// A row read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: i64,
    pub revision: i64,
    pub record: NormalizedRecord,
}

/// Catalog items grouped by format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatRow {
    pub format: String,
    pub items: i64,
    pub stock: i64,
}

/// One sales line joined with the catalog, as consumed by the sales reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleFact {
    pub order_ref: String,
    pub product_id: String,
    pub title: Option<String>,
    pub catalog_title: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub quantity: i64,
    pub net_amount: Decimal,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!("Opening store {path:?}");
        Self::prepare(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Looks up one entity by natural key.
    pub fn find(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let columns = kind.columns();
        let key_columns = kind.key_parts().iter().map(|part| part.column);
        let sql = format!(
            "SELECT id, revision, {} FROM {} WHERE {}",
            columns.join(", "),
            kind.table(),
            key_columns
                .enumerate()
                .map(|(idx, column)| format!("{column} = ?{}", idx + 1))
                .join(" AND "),
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_row(params_from_iter(key.0.iter()), |row| {
                let id: i64 = row.get(0)?;
                let revision: i64 = row.get(1)?;
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    values.push(OwnedCell::from(row.get_ref(idx + 2)?));
                }
                Ok((id, revision, values))
            })
            .optional()?;
        let Some((id, revision, values)) = raw else {
            return Ok(None);
        };

        let table = FieldTable::builtin(kind);
        let mut record = NormalizedRecord::new(kind);
        for (column, cell) in columns.iter().zip(values) {
            let field_kind = table
                .field(column)
                .map(|field| field.kind)
                .unwrap_or(FieldKind::Text);
            record.set(*column, decode_value(column, field_kind, cell)?);
        }
        Ok(Some(StoredRecord {
            id,
            revision,
            record,
        }))
    }

    pub fn catalog_by_format(&self, limit: usize) -> Result<Vec<FormatRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COALESCE(NULLIF(TRIM(format), ''), '(unspecified)') AS fmt,
                    COUNT(*),
                    COALESCE(SUM(stock), 0)
             FROM catalog_items
             GROUP BY fmt
             ORDER BY COUNT(*) DESC, fmt
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(FormatRow {
                    format: row.get(0)?,
                    items: row.get(1)?,
                    stock: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every sales line with the catalog title of its product, matched by
    /// ISBN first and SKU second.
    pub fn sale_facts(&self) -> Result<Vec<SaleFact>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.order_ref, s.product_id, s.title,
                    COALESCE(
                        (SELECT c.title FROM catalog_items c WHERE c.isbn = s.product_id LIMIT 1),
                        (SELECT c.title FROM catalog_items c WHERE c.sku = s.product_id)
                    ),
                    s.order_date, COALESCE(s.quantity, 0), s.net_amount
             FROM sales_lines s
             ORDER BY s.id",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(order_ref, product_id, title, catalog_title, date, quantity, net)| {
                    let order_date = date
                        .map(|text| parse_stored_date("order_date", text))
                        .transpose()?;
                    let net_amount = net
                        .map(|text| parse_stored_decimal("net_amount", text))
                        .transpose()?
                        .unwrap_or(Decimal::ZERO);
                    Ok(SaleFact {
                        order_ref,
                        product_id,
                        title,
                        catalog_title,
                        order_date,
                        quantity,
                        net_amount,
                    })
                },
            )
            .collect()
    }
}

fn upsert_sql(kind: EntityKind) -> String {
    let columns = kind.columns();
    let keys = kind.key_parts().iter().map(|part| part.column).join(", ");
    let merges = columns
        .iter()
        .filter(|column| !kind.is_key_column(column))
        .map(|column| format!("{column} = COALESCE(excluded.{column}, {column})"))
        .join(", ");
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
         ON CONFLICT ({keys}) DO UPDATE SET {merges}, \
         revision = revision + 1, updated_at = datetime('now') \
         RETURNING id, revision",
        table = kind.table(),
        cols = columns.join(", "),
        placeholders = placeholders(columns.len()),
    )
}

fn insert_sql(kind: EntityKind) -> String {
    let columns = kind.columns();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders(columns.len())
    )
}

fn placeholders(count: usize) -> String {
    (1..=count).map(|idx| format!("?{idx}")).join(", ")
}

impl RecordStore for SqliteStore {
    fn upsert(&self, record: &NormalizedRecord) -> Result<Upserted, StoreError> {
        let mut stmt = self.conn.prepare_cached(&upsert_sql(record.kind()))?;
        let values = record.column_values();
        let (id, revision): (i64, i64) = stmt
            .query_row(params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(StoreError::classify)?;
        Ok(Upserted {
            id,
            created: revision == 0,
        })
    }

    fn insert(&self, record: &NormalizedRecord) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare_cached(&insert_sql(record.kind()))?;
        let values = record.column_values();
        stmt.execute(params_from_iter(values.iter()))
            .map_err(StoreError::classify)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn clear(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {}", kind.table()), [])?;
        info!("Cleared {deleted} {kind} record(s) from {}", kind.table());
        Ok(deleted)
    }

    fn count(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// A column value detached from the statement that produced it.
enum OwnedCell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<ValueRef<'_>> for OwnedCell {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => OwnedCell::Null,
            ValueRef::Integer(i) => OwnedCell::Integer(i),
            ValueRef::Real(f) => OwnedCell::Real(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                OwnedCell::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

fn decode_value(column: &str, kind: FieldKind, cell: OwnedCell) -> Result<Value, StoreError> {
    let text = match cell {
        OwnedCell::Null => return Ok(Value::Null),
        OwnedCell::Integer(i) if kind == FieldKind::Quantity => return Ok(Value::Integer(i)),
        OwnedCell::Integer(i) => i.to_string(),
        OwnedCell::Real(f) => f.to_string(),
        OwnedCell::Text(text) => text,
    };
    Ok(match kind {
        FieldKind::Text | FieldKind::Identifier | FieldKind::Isbn => Value::Text(text),
        FieldKind::Currency | FieldKind::Percentage => {
            Value::Decimal(parse_stored_decimal(column, text)?)
        }
        FieldKind::Quantity => Value::Integer(text.parse().map_err(|_| StoreError::Corrupt {
            column: column.to_string(),
            value: text.clone(),
            expected: "integer",
        })?),
        FieldKind::Date => Value::Date(parse_stored_date(column, text)?),
    })
}

fn parse_stored_decimal(column: &str, text: String) -> Result<Decimal, StoreError> {
    Decimal::from_str(&text).map_err(|_| StoreError::Corrupt {
        column: column.to_string(),
        value: text,
        expected: "decimal",
    })
}

fn parse_stored_date(column: &str, text: String) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| StoreError::Corrupt {
        column: column.to_string(),
        value: text,
        expected: "date",
    })
}
