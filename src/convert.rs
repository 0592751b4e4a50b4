//! Bidirectional projection between wire-level JSON and the record graph.
//!
//! The converter is the boundary transport collaborators use: it operates
//! purely against a [`RecordContext`] and never touches the store directly.
//! A `type` discriminator selects the record type on import; nested objects
//! become referenced records. On export every reference expands the first
//! time its identity is seen within the call and collapses to an
//! identity+type stub on re-entry, so cycles terminate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::datatype::{AttributeKind, AttributeValue, Decimal, Time, from_hex, to_hex};
use crate::error::{BedrockError, Result};
use crate::record::{KeyHasher, Record, RecordContext, RecordKey};

pub const TYPE_FIELD: &str = "type";
pub const ID_FIELD: &str = "id";

fn conversion(field: &str, message: String) -> BedrockError {
    BedrockError::Conversion {
        field: field.to_owned(),
        message,
    }
}

fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Default)]
pub struct RecordJsonConverter;

impl RecordJsonConverter {
    pub fn new() -> Self {
        Self
    }

    /// Import a JSON object into the record graph of the given context.
    /// Existing identities are reused; unknown or absent identities get a
    /// fresh record. Fields absent from the input leave the corresponding
    /// attributes untouched.
    pub fn json_to_record(&self, json: &Value, context: &RecordContext) -> Result<Arc<Record>> {
        let mut imported: HashMap<RecordKey, Arc<Record>, KeyHasher> = HashMap::default();
        self.import_object(json, context, &mut imported, "$")
    }

    fn import_object(
        &self,
        json: &Value,
        context: &RecordContext,
        imported: &mut HashMap<RecordKey, Arc<Record>, KeyHasher>,
        field: &str,
    ) -> Result<Arc<Record>> {
        let Some(object) = json.as_object() else {
            return Err(conversion(
                field,
                format!("expected object, found {}", json_shape(json)),
            ));
        };
        let type_name = object
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                conversion(TYPE_FIELD, "missing or non-string type discriminator".into())
            })?;
        let declared_id = match object.get(ID_FIELD) {
            Some(id_value) => Some(id_value.as_u64().ok_or_else(|| {
                conversion(ID_FIELD, "identity must be an unsigned integer".into())
            })?),
            None => None,
        };
        let record = match declared_id {
            Some(id) => {
                let key = RecordKey::new(type_name, id);
                if let Some(existing) = imported.get(&key) {
                    Arc::clone(existing)
                } else if context.record_exists(&key)? {
                    context.record(type_name, id)?
                } else {
                    // the identity is not known here; a fresh record takes its place
                    debug!(key = %key, "unknown identity on import, creating a fresh record");
                    context.create_record(type_name)?
                }
            }
            None => context.create_record(type_name)?,
        };
        if let Some(id) = declared_id {
            imported.insert(RecordKey::new(type_name, id), Arc::clone(&record));
        }
        let record_type = context.schema().require(type_name)?;
        for (name, value) in object {
            if name == TYPE_FIELD || name == ID_FIELD {
                continue;
            }
            if value.is_null() {
                continue;
            }
            let Some(declared) = record_type.attribute(name) else {
                return Err(conversion(
                    name,
                    format!("unknown attribute of record type '{}'", type_name),
                ));
            };
            let attribute_value = match declared {
                AttributeKind::Reference => {
                    let child = self.import_object(value, context, imported, name)?;
                    AttributeValue::Reference(child.key().clone())
                }
                scalar => self.import_scalar(scalar, value, name)?,
            };
            context.set_attribute(&record, name, attribute_value)?;
        }
        Ok(record)
    }

    fn import_scalar(
        &self,
        kind: AttributeKind,
        value: &Value,
        field: &str,
    ) -> Result<AttributeValue> {
        let mismatch = || {
            conversion(
                field,
                format!("expected {}, found {}", kind, json_shape(value)),
            )
        };
        match kind {
            AttributeKind::String => value
                .as_str()
                .map(|s| AttributeValue::String(s.to_owned()))
                .ok_or_else(mismatch),
            AttributeKind::Integer => value
                .as_i64()
                .map(AttributeValue::Integer)
                .ok_or_else(mismatch),
            AttributeKind::Decimal => match value {
                Value::String(s) => Decimal::from_str(s),
                Value::Number(n) => Decimal::from_str(&n.to_string()),
                _ => None,
            }
            .map(AttributeValue::Decimal)
            .ok_or_else(mismatch),
            AttributeKind::Boolean => value
                .as_bool()
                .map(AttributeValue::Boolean)
                .ok_or_else(mismatch),
            AttributeKind::Time => value
                .as_str()
                .and_then(Time::from_str)
                .map(AttributeValue::Time)
                .ok_or_else(mismatch),
            AttributeKind::Bytes => value
                .as_str()
                .and_then(from_hex)
                .map(AttributeValue::Bytes)
                .ok_or_else(mismatch),
            AttributeKind::Reference => Err(BedrockError::Invariant(format!(
                "reference attribute '{}' reached the scalar importer",
                field
            ))),
        }
    }

    /// Project a record into the target JSON object, one field per
    /// attribute. References expand recursively; a per-call visited set
    /// breaks cycles by emitting identity+type stubs.
    pub fn record_to_json(
        &self,
        target: &mut Map<String, Value>,
        record: &Arc<Record>,
        context: &RecordContext,
    ) -> Result<()> {
        let mut visited: HashSet<RecordKey, KeyHasher> = HashSet::default();
        let object = self.export_record(record, context, &mut visited)?;
        for (name, value) in object {
            target.insert(name, value);
        }
        Ok(())
    }

    fn export_record(
        &self,
        record: &Arc<Record>,
        context: &RecordContext,
        visited: &mut HashSet<RecordKey, KeyHasher>,
    ) -> Result<Map<String, Value>> {
        visited.insert(record.key().clone());
        let mut object = Map::new();
        object.insert(TYPE_FIELD.to_owned(), Value::from(record.record_type()));
        object.insert(ID_FIELD.to_owned(), Value::from(record.id()));
        let mut attributes: Vec<(String, AttributeValue)> =
            context.attributes(record)?.into_iter().collect();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in attributes {
            let json_value = match value {
                AttributeValue::String(s) => Value::from(s),
                AttributeValue::Integer(i) => Value::from(i),
                AttributeValue::Decimal(d) => Value::from(d.to_string()),
                AttributeValue::Boolean(b) => Value::from(b),
                AttributeValue::Time(t) => Value::from(t.to_string()),
                AttributeValue::Bytes(b) => Value::from(to_hex(&b)),
                AttributeValue::Reference(key) => {
                    if visited.contains(&key) {
                        debug!(record = %key, "reference re-enters a visited identity, emitting stub");
                        Value::Object(stub(&key))
                    } else {
                        let referenced = context.record(key.record_type(), key.id())?;
                        Value::Object(self.export_record(&referenced, context, visited)?)
                    }
                }
            };
            object.insert(name, json_value);
        }
        Ok(object)
    }
}

/// The minimal identity+type fragment emitted in place of a fully expanded
/// reference.
fn stub(key: &RecordKey) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert(TYPE_FIELD.to_owned(), Value::from(key.record_type()));
    object.insert(ID_FIELD.to_owned(), Value::from(key.id()));
    object
}
