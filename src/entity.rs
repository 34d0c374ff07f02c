//! Entity kinds, ingestion modes, and the normalized record handed to storage.

use std::{collections::BTreeMap, fmt};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::data::Value;

/// The two record families fed by the external platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Product records from the catalog platform export.
    Catalog,
    /// Order lines from the sales platform export.
    Sales,
}

/// One component of a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPart {
    pub column: &'static str,
    pub required: bool,
}

const CATALOG_COLUMNS: &[&str] = &[
    "sku",
    "isbn",
    "title",
    "author",
    "publisher",
    "format",
    "list_price",
    "cost_price",
    "discount",
    "stock",
    "publication_date",
];

const SALES_COLUMNS: &[&str] = &[
    "order_ref",
    "line_ref",
    "product_id",
    "title",
    "customer",
    "channel",
    "order_date",
    "quantity",
    "unit_price",
    "discount",
    "net_amount",
    "tax",
];

const CATALOG_KEY: &[KeyPart] = &[KeyPart {
    column: "sku",
    required: true,
}];

const SALES_KEY: &[KeyPart] = &[
    KeyPart {
        column: "order_ref",
        required: true,
    },
    KeyPart {
        column: "line_ref",
        required: false,
    },
    KeyPart {
        column: "product_id",
        required: true,
    },
];

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Catalog => "catalog",
            EntityKind::Sales => "sales",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Catalog => "catalog_items",
            EntityKind::Sales => "sales_lines",
        }
    }

    /// Data columns in storage order, key columns included.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Catalog => CATALOG_COLUMNS,
            EntityKind::Sales => SALES_COLUMNS,
        }
    }

    pub fn key_parts(&self) -> &'static [KeyPart] {
        match self {
            EntityKind::Catalog => CATALOG_KEY,
            EntityKind::Sales => SALES_KEY,
        }
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.key_parts().iter().any(|part| part.column == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a natural-key collision is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Collisions update the stored entity, keeping existing values for blank fields.
    #[default]
    Merge,
    /// Every row is a plain insert; collisions are counted as duplicates.
    Append,
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestMode::Merge => f.write_str("merge"),
            IngestMode::Append => f.write_str("append"),
        }
    }
}

/// The business identity of a record, one string per key part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NaturalKey(pub Vec<String>);

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" / "))
    }
}

/// A fully typed record for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    kind: EntityKind,
    values: BTreeMap<String, Value>,
}

static NULL: Value = Value::Null;

impl NormalizedRecord {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Returns `None` when any required key part is null or empty.
    pub fn natural_key(&self) -> Option<NaturalKey> {
        let mut parts = Vec::with_capacity(self.kind.key_parts().len());
        for part in self.kind.key_parts() {
            let text = self
                .get(part.column)
                .as_text()
                .map(str::trim)
                .unwrap_or_default();
            if text.is_empty() && part.required {
                return None;
            }
            parts.push(text.to_string());
        }
        Some(NaturalKey(parts))
    }

    /// Values in [`EntityKind::columns`] order. Optional key parts that are
    /// null bind as the empty string so the uniqueness index sees them.
    pub fn column_values(&self) -> Vec<Value> {
        self.kind
            .columns()
            .iter()
            .map(|column| match self.get(column) {
                Value::Null if self.kind.is_key_column(column) => Value::Text(String::new()),
                other => other.clone(),
            })
            .collect()
    }
}
