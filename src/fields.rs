//! Declarative field tables.
//!
//! A [`FieldTable`] lists, for every target column of an [`EntityKind`], the
//! source-column aliases to try, the value kind to normalize into, and the
//! positional index used when a sheet has no usable header. Built-in tables
//! cover the catalog and sales platform exports; a YAML file with the same
//! shape replaces the built-in table for its kind.

use std::{collections::HashSet, fmt, fs, path::Path};

use anyhow::{Context, Result};
use clap::ValueEnum;
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

use crate::{
    entity::{EntityKind, IngestMode},
    error::FieldTableError,
};

/// Currency symbols and codes stripped from every currency cell.
pub const DEFAULT_CURRENCY_TOKENS: &[&str] = &["GBP", "USD", "EUR", "£", "$", "€", "¥"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Currency,
    Percentage,
    Quantity,
    Date,
    Identifier,
    Isbn,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Currency => "currency",
            FieldKind::Percentage => "percentage",
            FieldKind::Quantity => "quantity",
            FieldKind::Date => "date",
            FieldKind::Identifier => "identifier",
            FieldKind::Isbn => "isbn",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How header labels are compared with aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatching {
    #[default]
    Exact,
    CaseInsensitive,
}

impl LabelMatching {
    pub fn matches(&self, label: &str, alias: &str) -> bool {
        match self {
            LabelMatching::Exact => label == alias,
            LabelMatching::CaseInsensitive => label.to_lowercase() == alias.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_hyphens: Option<bool>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, aliases: &[&str], position: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            position,
            strip_hyphens: None,
        }
    }

    pub fn with_strip_hyphens(mut self, strip: bool) -> Self {
        self.strip_hyphens = Some(strip);
        self
    }

    /// ISBNs lose their hyphens unless told otherwise; other identifiers keep them.
    pub fn strips_hyphens(&self) -> bool {
        self.strip_hyphens.unwrap_or(self.kind == FieldKind::Isbn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTable {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<IngestMode>,
    #[serde(default)]
    pub label_matching: LabelMatching,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub currency_tokens: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl FieldTable {
    pub fn builtin(kind: EntityKind) -> Self {
        let fields = match kind {
            EntityKind::Catalog => catalog_fields(),
            EntityKind::Sales => sales_fields(),
        };
        Self {
            kind,
            mode: None,
            label_matching: LabelMatching::Exact,
            currency_tokens: Vec::new(),
            fields,
        }
    }

    /// Loads the YAML table at `path`, or the built-in table when no path is given.
    pub fn resolve(kind: EntityKind, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::builtin(kind));
        };
        let table = Self::load(path)?;
        if table.kind != kind {
            return Err(FieldTableError::KindMismatch {
                expected: kind.to_string(),
                found: table.kind.to_string(),
            })
            .with_context(|| format!("Loading field table from {path:?}"));
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Opening field table {path:?}"))?;
        let mut table: FieldTable = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing field table {path:?}"))?;
        for field in &mut table.fields {
            field.name = field.name.trim().to_snake_case();
        }
        table
            .validate()
            .with_context(|| format!("Validating field table {path:?}"))?;
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = self.to_yaml()?;
        fs::write(path, serialized).with_context(|| format!("Writing field table {path:?}"))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), FieldTableError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !self.kind.has_column(&field.name) {
                return Err(FieldTableError::UnknownField {
                    kind: self.kind.to_string(),
                    field: field.name.clone(),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(FieldTableError::DuplicateField(field.name.clone()));
            }
            if field.aliases.is_empty() && field.position.is_none() {
                return Err(FieldTableError::Unreachable(field.name.clone()));
            }
        }
        for part in self.kind.key_parts().iter().filter(|part| part.required) {
            if !seen.contains(part.column) {
                return Err(FieldTableError::MissingKeyField(part.column.to_string()));
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Built-in currency tokens followed by the table's extras.
    pub fn currency_tokens(&self) -> Vec<&str> {
        DEFAULT_CURRENCY_TOKENS
            .iter()
            .copied()
            .chain(self.currency_tokens.iter().map(String::as_str))
            .collect()
    }
}

fn catalog_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(
            "sku",
            FieldKind::Identifier,
            &["SKU", "Sku", "sku", "Product Code", "Item Code"],
            Some(0),
        )
        .with_strip_hyphens(true),
        FieldSpec::new(
            "isbn",
            FieldKind::Isbn,
            &["ISBN", "ISBN13", "ISBN-13", "isbn", "EAN"],
            Some(1),
        ),
        FieldSpec::new(
            "title",
            FieldKind::Text,
            &["Title", "title", "Product Name", "Name"],
            Some(2),
        ),
        FieldSpec::new(
            "author",
            FieldKind::Text,
            &["Author", "Authors", "author", "Contributor"],
            Some(3),
        ),
        FieldSpec::new(
            "publisher",
            FieldKind::Text,
            &["Publisher", "publisher", "Imprint"],
            Some(4),
        ),
        FieldSpec::new(
            "format",
            FieldKind::Text,
            &["Format", "format", "Binding", "Product Form"],
            Some(5),
        ),
        FieldSpec::new(
            "list_price",
            FieldKind::Currency,
            &["RRP", "List Price", "Price", "price", "Retail Price"],
            Some(6),
        ),
        FieldSpec::new(
            "cost_price",
            FieldKind::Currency,
            &["Cost", "Cost Price", "Unit Cost", "cost"],
            Some(7),
        ),
        FieldSpec::new(
            "discount",
            FieldKind::Percentage,
            &["Discount", "Discount %", "Trade Discount", "discount"],
            Some(8),
        ),
        FieldSpec::new(
            "stock",
            FieldKind::Quantity,
            &["Stock", "Qty In Stock", "Stock Level", "stock", "Quantity"],
            Some(9),
        ),
        FieldSpec::new(
            "publication_date",
            FieldKind::Date,
            &["Publication Date", "Pub Date", "Published", "publication_date"],
            Some(10),
        ),
    ]
}

fn sales_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(
            "order_ref",
            FieldKind::Identifier,
            &[
                "Order ID",
                "Order Number",
                "Order Ref",
                "Invoice",
                "Invoice Number",
                "order_ref",
            ],
            Some(0),
        ),
        FieldSpec::new(
            "line_ref",
            FieldKind::Identifier,
            &["Line", "Line Item", "Line ID", "Item ID", "line_ref"],
            Some(1),
        ),
        FieldSpec::new(
            "product_id",
            FieldKind::Isbn,
            &["ISBN", "EAN", "SKU", "Product Code", "product_id"],
            Some(2),
        ),
        FieldSpec::new(
            "title",
            FieldKind::Text,
            &["Title", "Product", "Item Name", "title"],
            Some(3),
        ),
        FieldSpec::new(
            "customer",
            FieldKind::Text,
            &["Customer", "Customer Name", "Buyer", "customer"],
            Some(4),
        ),
        FieldSpec::new(
            "channel",
            FieldKind::Text,
            &["Channel", "Sales Channel", "Marketplace", "channel"],
            Some(5),
        ),
        FieldSpec::new(
            "order_date",
            FieldKind::Date,
            &["Order Date", "Date", "Invoice Date", "order_date"],
            Some(6),
        ),
        FieldSpec::new(
            "quantity",
            FieldKind::Quantity,
            &["Qty", "Quantity", "Units", "quantity"],
            Some(7),
        ),
        FieldSpec::new(
            "unit_price",
            FieldKind::Currency,
            &["Unit Price", "Price", "Item Price", "unit_price"],
            Some(8),
        ),
        FieldSpec::new(
            "discount",
            FieldKind::Percentage,
            &["Discount", "Discount %", "discount"],
            Some(9),
        ),
        FieldSpec::new(
            "net_amount",
            FieldKind::Currency,
            &["Net", "Net Amount", "Line Total", "Total", "net_amount"],
            Some(10),
        ),
        FieldSpec::new("tax", FieldKind::Currency, &["VAT", "Tax", "tax"], Some(11)),
    ]
}
