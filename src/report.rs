//! Aggregate reports over ingested data.

use std::collections::HashSet;

use clap::ValueEnum;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    error::StoreError,
    store::{FormatRow, SaleFact, SqliteStore},
    table::Column,
};

pub const UNDATED_MONTH: &str = "(undated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// Catalog items and stock by format.
    Catalog,
    /// Units and net revenue per product, best sellers first.
    SalesByProduct,
    /// Orders, units and net revenue per month, most recent first.
    SalesByMonth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub product_id: String,
    /// Catalog title when the product is known there, else the title on the sales lines.
    pub title: Option<String>,
    pub orders: usize,
    pub units: i64,
    pub net_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthSales {
    /// `YYYY-MM`, or [`UNDATED_MONTH`].
    pub month: String,
    pub orders: usize,
    pub units: i64,
    pub net_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Catalog(Vec<FormatRow>),
    SalesByProduct(Vec<ProductSales>),
    SalesByMonth(Vec<MonthSales>),
}

impl Report {
    pub fn build(store: &SqliteStore, kind: ReportKind, limit: usize) -> Result<Self, StoreError> {
        Ok(match kind {
            ReportKind::Catalog => Report::Catalog(store.catalog_by_format(limit)?),
            ReportKind::SalesByProduct => {
                Report::SalesByProduct(sales_by_product(&store.sale_facts()?, limit))
            }
            ReportKind::SalesByMonth => {
                Report::SalesByMonth(sales_by_month(&store.sale_facts()?, limit))
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Report::Catalog(rows) => rows.is_empty(),
            Report::SalesByProduct(rows) => rows.is_empty(),
            Report::SalesByMonth(rows) => rows.is_empty(),
        }
    }

    pub fn columns(&self) -> Vec<Column> {
        match self {
            Report::Catalog(_) => vec![
                Column::left("format"),
                Column::right("items"),
                Column::right("stock"),
            ],
            Report::SalesByProduct(_) => vec![
                Column::left("product"),
                Column::left("title"),
                Column::right("orders"),
                Column::right("units"),
                Column::right("net"),
            ],
            Report::SalesByMonth(_) => vec![
                Column::left("month"),
                Column::right("orders"),
                Column::right("units"),
                Column::right("net"),
            ],
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        match self {
            Report::Catalog(rows) => rows
                .iter()
                .map(|row| vec![row.format.clone(), row.items.to_string(), row.stock.to_string()])
                .collect(),
            Report::SalesByProduct(rows) => rows
                .iter()
                .map(|row| {
                    vec![
                        row.product_id.clone(),
                        row.title.clone().unwrap_or_default(),
                        row.orders.to_string(),
                        row.units.to_string(),
                        money(row.net_revenue),
                    ]
                })
                .collect(),
            Report::SalesByMonth(rows) => rows
                .iter()
                .map(|row| {
                    vec![
                        row.month.clone(),
                        row.orders.to_string(),
                        row.units.to_string(),
                        money(row.net_revenue),
                    ]
                })
                .collect(),
        }
    }
}

fn money(amount: Decimal) -> String {
    let mut amount = amount;
    amount.rescale(2);
    amount.to_string()
}

fn distinct_orders<'a>(facts: impl Iterator<Item = &'a SaleFact>) -> usize {
    facts
        .map(|fact| fact.order_ref.as_str())
        .collect::<HashSet<_>>()
        .len()
}

pub fn sales_by_product(facts: &[SaleFact], limit: usize) -> Vec<ProductSales> {
    facts
        .iter()
        .into_group_map_by(|fact| fact.product_id.clone())
        .into_iter()
        .map(|(product_id, lines)| ProductSales {
            title: lines
                .iter()
                .find_map(|fact| fact.catalog_title.clone())
                .or_else(|| lines.iter().find_map(|fact| fact.title.clone())),
            orders: distinct_orders(lines.iter().copied()),
            units: lines.iter().map(|fact| fact.quantity).sum(),
            net_revenue: lines.iter().map(|fact| fact.net_amount).sum(),
            product_id,
        })
        .sorted_by(|a, b| {
            b.net_revenue
                .cmp(&a.net_revenue)
                .then(b.units.cmp(&a.units))
                .then(a.product_id.cmp(&b.product_id))
        })
        .take(limit)
        .collect()
}

pub fn sales_by_month(facts: &[SaleFact], limit: usize) -> Vec<MonthSales> {
    facts
        .iter()
        .into_group_map_by(|fact| fact.order_date.map(|date| date.format("%Y-%m").to_string()))
        .into_iter()
        // Most recent first; `None` sorts below every month.
        .sorted_by(|(a, _), (b, _)| b.cmp(a))
        .take(limit)
        .map(|(month, lines)| MonthSales {
            month: month.unwrap_or_else(|| UNDATED_MONTH.to_string()),
            orders: distinct_orders(lines.iter().copied()),
            units: lines.iter().map(|fact| fact.quantity).sum(),
            net_revenue: lines.iter().map(|fact| fact.net_amount).sum(),
        })
        .collect()
}
