//! Row-level change events and their decoding from change-feed records.

use crate::{Error, MappingRegistry, Result, RowImage, Table, Value};
use serde_json::Value as Json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    SnapshotRead,
    Update,
    Delete,
}

impl Operation {
    /// Debezium op code: c=create, r=read (snapshot), u=update, d=delete.
    pub fn from_debezium(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "r" => Some(Operation::SnapshotRead),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::SnapshotRead => write!(f, "snapshot"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventFormat {
    /// Debezium envelope (`{"payload": {"op", "before", "after", "source"}}`).
    Debezium,
    /// wal2json format-version 2, one change per record.
    Wal2json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub source_table: Table,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub key: Value,
}

impl ChangeEvent {
    /// Builds an event, deriving its key from `after` if present, else `before`.
    pub fn new(
        operation: Operation,
        source_table: Table,
        before: Option<RowImage>,
        after: Option<RowImage>,
        key_column: &str,
    ) -> Result<Self> {
        if operation != Operation::Delete && after.is_none() {
            return Err(Error::MalformedEvent(format!(
                "{operation} on {source_table} has no after image"
            )));
        }
        let image = after.as_ref().or(before.as_ref()).ok_or_else(|| {
            Error::MalformedEvent(format!(
                "{operation} on {source_table} has neither before nor after image"
            ))
        })?;
        let key = match image.get(key_column) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                return Err(Error::MalformedEvent(format!(
                    "{operation} on {source_table} carries no value for key column {key_column}"
                )));
            }
        };
        Ok(ChangeEvent {
            operation,
            source_table,
            before,
            after,
            key,
        })
    }
}

/// What a single feed record turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(ChangeEvent),
    /// Debezium tombstone following a delete.
    Tombstone,
    /// Transaction markers and other non-row records.
    Control,
}

/// Decodes one feed record. The registry supplies the key column of the
/// event's table, so an unmapped table fails with `UnknownTable`.
pub fn decode(format: EventFormat, payload: &[u8], registry: &MappingRegistry) -> Result<Decoded> {
    let json: Json = serde_json::from_slice(payload)
        .map_err(|e| Error::MalformedEvent(format!("unparseable record: {e}")))?;
    match format {
        EventFormat::Debezium => decode_debezium(&json, registry),
        EventFormat::Wal2json => decode_wal2json(&json, registry),
    }
}

fn decode_debezium(json: &Json, registry: &MappingRegistry) -> Result<Decoded> {
    if json.is_null() {
        return Ok(Decoded::Tombstone);
    }
    let payload = match json.get("payload") {
        Some(Json::Null) => return Ok(Decoded::Tombstone),
        Some(payload) => payload,
        None => json,
    };
    let op = payload
        .get("op")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::MalformedEvent("missing op".to_string()))?;
    let operation = Operation::from_debezium(op)
        .ok_or_else(|| Error::MalformedEvent(format!("unknown op code {op:?}")))?;
    let source = payload
        .get("source")
        .ok_or_else(|| Error::MalformedEvent("missing source block".to_string()))?;
    let name = source
        .get("table")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::MalformedEvent("missing source.table".to_string()))?;
    let schema = source.get("schema").and_then(Json::as_str);
    let table = Table::new(schema, name);
    let mapping = registry.resolve(&table)?;
    let before = object_image(payload.get("before"))?;
    let after = object_image(payload.get("after"))?;
    ChangeEvent::new(operation, table, before, after, &mapping.primary_key.source)
        .map(Decoded::Event)
}

fn object_image(json: Option<&Json>) -> Result<Option<RowImage>> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Object(fields)) => Ok(Some(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        )),
        Some(other) => Err(Error::MalformedEvent(format!(
            "row image is not an object: {other}"
        ))),
    }
}

fn decode_wal2json(json: &Json, registry: &MappingRegistry) -> Result<Decoded> {
    let action = json
        .get("action")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::MalformedEvent("missing action".to_string()))?;
    let operation = match action {
        "I" => Operation::Create,
        "U" => Operation::Update,
        "D" => Operation::Delete,
        "B" | "C" | "M" | "T" => return Ok(Decoded::Control),
        other => {
            return Err(Error::MalformedEvent(format!("unknown action {other:?}")));
        }
    };
    let name = json
        .get("table")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::MalformedEvent("missing table".to_string()))?;
    let schema = json.get("schema").and_then(Json::as_str);
    let table = Table::new(schema, name);
    let mapping = registry.resolve(&table)?;
    let columns = column_image(json.get("columns"))?;
    let identity = column_image(json.get("identity"))?;
    let (before, after) = match operation {
        Operation::Delete => (identity, None),
        _ => (identity, columns),
    };
    ChangeEvent::new(operation, table, before, after, &mapping.primary_key.source)
        .map(Decoded::Event)
}

/// wal2json v2 renders images as `[{"name", "type", "value"}, ...]`.
fn column_image(json: Option<&Json>) -> Result<Option<RowImage>> {
    let Some(columns) = json.and_then(Json::as_array) else {
        return Ok(None);
    };
    columns
        .iter()
        .map(|col| {
            let name = col
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::MalformedEvent("column without name".to_string()))?;
            let value = col.get("value").map(Value::from_json).unwrap_or(Value::Null);
            Ok((name.to_string(), value))
        })
        .collect::<Result<RowImage>>()
        .map(Some)
}
