//! Uniqueness validation of pending record batches.
//!
//! Validation is all-or-nothing per batch: every dirty or fresh record is
//! checked against the other records of the batch and against committed
//! state before anything is written. The probes computed here are re-run by
//! the store inside its write transaction, so racing contexts cannot both
//! commit a colliding tuple.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::datatype::AttributeValue;
use crate::error::{BedrockError, Result};
use crate::persist::BackingStore;
use crate::record::{OtherHasher, Record, RecordKey};
use crate::schema::{Schema, UniqueConstraint};

/// One constraint check for one pending record: the constraint name, the
/// record under validation and its attribute value tuple.
#[derive(Debug, Clone)]
pub struct ConstraintProbe {
    constraint: String,
    record: RecordKey,
    attributes: Vec<String>,
    values: Vec<AttributeValue>,
}

impl ConstraintProbe {
    pub fn constraint(&self) -> &str {
        &self.constraint
    }
    pub fn record(&self) -> &RecordKey {
        &self.record
    }
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }
    /// Render the offending tuple, e.g. `email=a@x.com`.
    pub fn tuple(&self) -> String {
        let mut parts = Vec::with_capacity(self.attributes.len());
        for (attribute, value) in self.attributes.iter().zip(&self.values) {
            parts.push(format!("{}={}", attribute, value));
        }
        parts.join(", ")
    }
    pub fn violation(&self) -> BedrockError {
        BedrockError::ConstraintViolation {
            constraint: self.constraint.clone(),
            record: self.record.to_string(),
            tuple: self.tuple(),
        }
    }
}

/// Validate a pending batch against itself and against committed state.
/// Returns the probes for the store to re-check at commit time, or the
/// first violation found.
pub fn validate_batch(
    schema: &Schema,
    store: &dyn BackingStore,
    pending: &[(Arc<Record>, HashMap<String, AttributeValue, OtherHasher>)],
) -> Result<Vec<ConstraintProbe>> {
    let mut probes = Vec::new();
    let mut seen: HashMap<(String, Vec<AttributeValue>), RecordKey, OtherHasher> =
        HashMap::default();
    for (record, attributes) in pending {
        let record_type = schema.require(record.record_type())?;
        for constraint in record_type.constraints() {
            // a tuple with any absent attribute never collides (SQL null semantics)
            let Some(values) = tuple_of(constraint, attributes) else {
                continue;
            };
            let probe = ConstraintProbe {
                constraint: constraint.name().to_owned(),
                record: record.key().clone(),
                attributes: constraint.attributes().to_vec(),
                values: values.clone(),
            };
            let scope = format!("{}::{}", record.record_type(), constraint.name());
            match seen.entry((scope, values)) {
                Entry::Occupied(e) if e.get() != record.key() => {
                    warn!(
                        constraint = probe.constraint(),
                        record = %probe.record(),
                        colliding = %e.get(),
                        "uniqueness violation within pending batch"
                    );
                    return Err(probe.violation());
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(e) => {
                    e.insert(record.key().clone());
                }
            }
            if let Some(existing) = store.find_by_tuple(&probe)? {
                warn!(
                    constraint = probe.constraint(),
                    record = %probe.record(),
                    existing,
                    "uniqueness violation against committed state"
                );
                return Err(probe.violation());
            }
            probes.push(probe);
        }
    }
    debug!(probes = probes.len(), "batch validated");
    Ok(probes)
}

fn tuple_of(
    constraint: &UniqueConstraint,
    attributes: &HashMap<String, AttributeValue, OtherHasher>,
) -> Option<Vec<AttributeValue>> {
    let mut values = Vec::with_capacity(constraint.attributes().len());
    for attribute in constraint.attributes() {
        values.push(attributes.get(attribute)?.clone());
    }
    Some(values)
}
