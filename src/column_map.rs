use crate::{Error, Result, RowImage, Value};

/// Ordered source-to-target column pairs. A `None` target marks a source
/// column that is deliberately dropped (e.g. an identity superseded by a
/// target-generated key).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMap(Vec<(String, Option<String>)>);

impl ColumnMap {
    pub fn new(pairs: Vec<(String, Option<String>)>) -> Self {
        ColumnMap(pairs)
    }

    pub fn pairs(&self) -> &[(String, Option<String>)] {
        &self.0
    }

    /// Target columns that correspond to source columns, in mapping order.
    pub fn target_cols(&self) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|(_source, target)| target.clone())
            .collect()
    }

    /// Source columns that have a corresponding target column.
    pub fn source_cols(&self) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|(source, target)| target.as_ref().map(|_| source.clone()))
            .collect()
    }

    pub fn is_ignored(&self, source_col: &str) -> bool {
        self.0
            .iter()
            .any(|(source, target)| source == source_col && target.is_none())
    }

    pub fn target_for(&self, source_col: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(source, _)| source == source_col)
            .and_then(|(_, target)| target.as_deref())
    }

    pub fn source_for(&self, target_col: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, target)| target.as_deref() == Some(target_col))
            .map(|(source, _)| source.as_str())
    }

    /// Projects a source row image onto the mapped target columns, in order.
    pub fn project(&self, table: &str, row: &RowImage) -> Result<Vec<Value>> {
        self.source_cols()
            .into_iter()
            .map(|col| match row.get(&col) {
                Some(value) => Ok(value.clone()),
                None => Err(Error::MissingColumn {
                    table: table.to_string(),
                    column: col,
                }),
            })
            .collect()
    }
}
