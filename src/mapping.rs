//! Static source-to-target schema mapping shared by the applier and reconciliation.
//!
//! The registry is built once at startup and never mutated, so it is shared
//! across worker threads behind an `Arc` without locking.

use crate::config::{MappingFile, TableEntry};
use crate::{ColumnMap, Error, Result, RowImage, Table, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Primary-key column in source and target naming.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub source: String,
    pub target: String,
}

/// A source row projected onto target columns.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetRow {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableMapping {
    pub source: Table,
    pub target: Table,
    pub columns: ColumnMap,
    pub primary_key: KeyPair,
    /// Numeric target columns compared by the metric check.
    pub metrics: Vec<String>,
}

impl TableMapping {
    pub fn project_to_target(&self, row: &RowImage) -> Result<TargetRow> {
        let values = self.columns.project(&self.source.to_string(), row)?;
        Ok(TargetRow {
            columns: self.columns.target_cols(),
            values,
        })
    }

    /// Metric columns as (source, target) pairs.
    pub fn metric_pairs(&self) -> Vec<(String, String)> {
        self.metrics
            .iter()
            .filter_map(|target| {
                self.columns
                    .source_for(target)
                    .map(|source| (source.to_string(), target.clone()))
            })
            .collect()
    }

    fn from_entry(entry: TableEntry) -> Result<Self> {
        let source = entry.source.to_string();
        if entry.columns.is_empty() {
            return Err(Error::Config(format!("{source}: no columns mapped")));
        }
        let mut pairs = Vec::with_capacity(entry.columns.len());
        let mut seen_targets = BTreeSet::new();
        for column in entry.columns {
            match (column.target, column.ignored) {
                (_, true) => pairs.push((column.source, None)),
                (Some(target), false) => {
                    if !seen_targets.insert(target.clone()) {
                        return Err(Error::Config(format!(
                            "{source}: target column {target} mapped twice"
                        )));
                    }
                    pairs.push((column.source, Some(target)));
                }
                (None, false) => {
                    return Err(Error::Config(format!(
                        "{source}: column {} has no target and is not marked ignored",
                        column.source
                    )));
                }
            }
        }
        let columns = ColumnMap::new(pairs);
        let primary_key = KeyPair {
            source: entry.primary_key.source,
            target: entry.primary_key.target,
        };
        if columns.target_for(&primary_key.source) != Some(primary_key.target.as_str()) {
            return Err(Error::Config(format!(
                "{source}: primary key {} -> {} is not a mapped column pair",
                primary_key.source, primary_key.target
            )));
        }
        for metric in &entry.metrics {
            if columns.source_for(metric).is_none() {
                return Err(Error::Config(format!(
                    "{source}: metric column {metric} is not a mapped target column"
                )));
            }
        }
        Ok(TableMapping {
            source: entry.source,
            target: entry.target,
            columns,
            primary_key,
            metrics: entry.metrics,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct MappingRegistry {
    tables: BTreeMap<Table, TableMapping>,
}

impl MappingRegistry {
    pub fn from_mappings(mappings: Vec<TableMapping>) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for mapping in mappings {
            let key = mapping.source.clone();
            if tables.insert(key.clone(), mapping).is_some() {
                return Err(Error::Config(format!("table {key} mapped more than once")));
            }
        }
        Ok(MappingRegistry { tables })
    }

    pub fn from_file_contents(file: MappingFile) -> Result<Self> {
        let mappings = file
            .tables
            .into_iter()
            .map(TableMapping::from_entry)
            .collect::<Result<Vec<_>>>()?;
        Self::from_mappings(mappings)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Self::from_file_contents(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Mappings for the AdventureWorksLite sample schema.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(crate::config::DEFAULT_MAPPINGS)
    }

    /// Resolves a source table. A schema-qualified name falls back to the
    /// bare name, and a bare name matches a single qualified mapping.
    pub fn resolve(&self, source: &Table) -> Result<&TableMapping> {
        if let Some(mapping) = self.tables.get(source) {
            return Ok(mapping);
        }
        if source.schema.is_some() {
            if let Some(mapping) = self.tables.get(&source.unqualified()) {
                return Ok(mapping);
            }
        } else {
            let mut candidates = self.tables.values().filter(|m| m.source.name == source.name);
            if let (Some(mapping), None) = (candidates.next(), candidates.next()) {
                return Ok(mapping);
            }
        }
        Err(Error::UnknownTable(source.to_string()))
    }

    pub fn resolve_name(&self, source: &str) -> Result<&TableMapping> {
        let table: Table = source
            .parse()
            .map_err(|_| Error::UnknownTable(source.to_string()))?;
        self.resolve(&table)
    }

    /// Looks a mapping up by either its source or its target name.
    pub fn resolve_any(&self, name: &str) -> Result<&TableMapping> {
        self.resolve_name(name).or_else(|err| {
            self.tables
                .values()
                .find(|m| m.target.to_string() == name || m.target.name == name)
                .ok_or(err)
        })
    }

    pub fn mappings(&self) -> impl Iterator<Item = &TableMapping> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"
        [[tables]]
        source = "dbo.Orders"
        target = "public.orders"
        primary_key = { source = "OrderID", target = "order_id" }
        metrics = ["total_amount"]
        columns = [
            { source = "OrderID", target = "order_id" },
            { source = "RowVersion", ignored = true },
            { source = "TotalAmount", target = "total_amount" },
        ]
    "#;

    #[test]
    fn test_resolve_qualified_and_bare() {
        let registry = MappingRegistry::from_toml_str(ORDERS).unwrap();
        let by_full = registry.resolve_name("dbo.Orders").unwrap();
        assert_eq!(by_full.target.to_string(), "public.orders");
        assert_eq!(registry.resolve_name("Orders").unwrap(), by_full);
        assert_eq!(registry.resolve_any("public.orders").unwrap(), by_full);
        assert!(matches!(
            registry.resolve_name("dbo.Customers"),
            Err(Error::UnknownTable(t)) if t == "dbo.Customers"
        ));
    }

    #[test]
    fn test_project_to_target_drops_ignored() {
        let registry = MappingRegistry::from_toml_str(ORDERS).unwrap();
        let mapping = registry.resolve_name("Orders").unwrap();
        let mut row = RowImage::new();
        row.insert("OrderID".into(), Value::Int(1));
        row.insert("TotalAmount".into(), Value::Float(100.0));
        let projected = mapping.project_to_target(&row).unwrap();
        assert_eq!(projected.columns, vec!["order_id", "total_amount"]);
        assert_eq!(projected.values, vec![Value::Int(1), Value::Float(100.0)]);
        assert_eq!(
            mapping.metric_pairs(),
            vec![("TotalAmount".to_string(), "total_amount".to_string())]
        );
    }

    #[test]
    fn test_rejects_unmapped_primary_key() {
        let bad = ORDERS.replace(
            r#"primary_key = { source = "OrderID", target = "order_id" }"#,
            r#"primary_key = { source = "RowVersion", target = "row_version" }"#,
        );
        assert!(matches!(
            MappingRegistry::from_toml_str(&bad),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_column_without_target() {
        let bad = ORDERS.replace(
            r#"{ source = "RowVersion", ignored = true }"#,
            r#"{ source = "RowVersion" }"#,
        );
        assert!(matches!(
            MappingRegistry::from_toml_str(&bad),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_table() {
        let doubled = format!("{ORDERS}\n{ORDERS}");
        assert!(matches!(
            MappingRegistry::from_toml_str(&doubled),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builtin_mappings_load() {
        let registry = MappingRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 4);
        let orders = registry.resolve_name("Orders").unwrap();
        assert_eq!(orders.primary_key.target, "order_id");
        assert!(orders.metrics.contains(&"total_amount".to_string()));
    }
}
