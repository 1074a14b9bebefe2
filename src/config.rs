//! On-disk mapping configuration.
//!
//! ```toml
//! [[tables]]
//! source = "dbo.Orders"
//! target = "public.orders"
//! primary_key = { source = "OrderID", target = "order_id" }
//! metrics = ["total_amount"]
//! columns = [
//!     { source = "OrderID", target = "order_id" },
//!     { source = "RowGuid", ignored = true },
//! ]
//! ```

use crate::Table;
use serde::Deserialize;

pub const DEFAULT_MAPPINGS: &str = include_str!("../mappings/adventureworks.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingFile {
    #[serde(default)]
    pub tables: Vec<TableEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub source: Table,
    pub target: Table,
    pub primary_key: KeyEntry,
    /// Target column names.
    #[serde(default)]
    pub metrics: Vec<String>,
    pub columns: Vec<ColumnEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyEntry {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnEntry {
    pub source: String,
    pub target: Option<String>,
    #[serde(default)]
    pub ignored: bool,
}
