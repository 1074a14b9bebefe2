//! Column values as seen by both stores and the change feed.

use postgres::types::Type;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Row image keyed by source column name.
pub type RowImage = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality across stores: integers and floats compare by numeric value.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Text form used as a bind parameter; the store casts it to the column type.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Reads column `idx`, which must be one of the types [`select_expr`] leaves uncast.
    pub fn from_pg(row: &postgres::Row, idx: usize) -> Result<Value, postgres::Error> {
        let ty = row.columns()[idx].type_();
        let value = match *ty {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| Value::Int(v.into())),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)?
                .map(|v| Value::Int(v.into())),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| Value::Float(v.into())),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
            _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        };
        Ok(value.unwrap_or(Value::Null))
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

/// Select-list expression for a column of type `ty` so that [`Value::from_pg`] can read it.
pub fn select_expr(quoted_column: &str, ty: &Type) -> String {
    match *ty {
        Type::BOOL
        | Type::INT2
        | Type::INT4
        | Type::INT8
        | Type::FLOAT4
        | Type::FLOAT8
        | Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME => quoted_column.to_string(),
        Type::NUMERIC => format!("{quoted_column}::float8"),
        _ => format!("{quoted_column}::text"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Total order over values so they can key an ordered map.
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(&json!("x")), Value::Text("x".into()));
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(
            Value::from_json(&json!({"a": 1})),
            Value::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_numeric_matching_across_types() {
        assert!(Value::Int(150).matches(&Value::Float(150.0)));
        assert!(Value::Float(150.0).matches(&Value::Int(150)));
        assert!(!Value::Int(150).matches(&Value::Float(150.5)));
        assert!(!Value::Text("150".into()).matches(&Value::Int(150)));
        assert!(Value::Null.matches(&Value::Null));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::Int(3).to_text().as_deref(), Some("3"));
        assert_eq!(Value::Float(150.0).to_text().as_deref(), Some("150"));
        assert_eq!(Value::Null.to_text(), None);
    }

    #[test]
    fn test_ordered_value() {
        let mut keys = vec![
            OrderedValue(Value::Int(10)),
            OrderedValue(Value::Int(2)),
            OrderedValue(Value::Float(2.5)),
        ];
        keys.sort();
        let sorted: Vec<Value> = keys.into_iter().map(|k| k.0).collect();
        assert_eq!(sorted, vec![Value::Int(2), Value::Float(2.5), Value::Int(10)]);
        assert_eq!(OrderedValue(Value::Int(1)), OrderedValue(Value::Float(1.0)));
    }

    #[test]
    fn test_select_expr() {
        assert_eq!(select_expr("\"price\"", &Type::NUMERIC), "\"price\"::float8");
        assert_eq!(select_expr("\"id\"", &Type::INT4), "\"id\"");
        assert_eq!(select_expr("\"ts\"", &Type::TIMESTAMP), "\"ts\"::text");
    }
}
