// src/table.rs
// Schema-qualified table identity shared by mappings, events and stores.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Table {
    pub schema: Option<String>,
    pub name: String,
}

impl FromStr for Table {
    type Err = crate::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let table = if let Some((schema, name)) = s.split_once('.') {
            Table {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            }
        } else {
            Table {
                schema: None,
                name: s.to_string(),
            }
        };
        if table.name.is_empty() || table.schema.as_deref() == Some("") {
            return Err(crate::Error::Config(format!("invalid table name {s:?}")));
        }
        Ok(table)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl<'de> Deserialize<'de> for Table {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Table {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Table {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Quoted form safe to splice into SQL, preserving case.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// The same table without its schema qualifier.
    pub fn unqualified(&self) -> Table {
        Table {
            schema: None,
            name: self.name.clone(),
        }
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
