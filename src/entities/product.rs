//! Product rows from the catalog.
//!
//! The core never does product CRUD; it only reads and writes `stock_qty`
//! through the stock ledger primitive (`crate::stock`).

use chrono::{DateTime, Utc};
use may_postgres::Row;
use rust_decimal::Decimal;
use sea_query::Iden;
use serde::Serialize;
use uuid::Uuid;

/// Column identifiers for `products`
#[derive(Iden)]
pub enum Products {
    Table,
    ProductId,
    CategoryId,
    Sku,
    Name,
    Description,
    ImageUrl,
    UnitPrice,
    Cost,
    StockQty,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub unit_price: Decimal,
    pub cost: Decimal,
    pub stock_qty: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Column list matching [`Product::from_row`]
    pub const COLUMNS: &'static str = "product_id, category_id, sku, name, description, \
         image_url, unit_price, cost, stock_qty, is_active, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        Self {
            product_id: row.get("product_id"),
            category_id: row.get("category_id"),
            sku: row.get("sku"),
            name: row.get("name"),
            description: row.get("description"),
            image_url: row.get("image_url"),
            unit_price: row.get("unit_price"),
            cost: row.get("cost"),
            stock_qty: row.get("stock_qty"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}
