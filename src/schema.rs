//! Declared record types: attribute kinds and uniqueness rules.
//!
//! A [`Schema`] is built once, before any [`crate::record::Database`] opens,
//! and stays immutable afterwards. Record types are kept behind `Arc` so
//! contexts and converters can hold on to them without copying.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use crate::datatype::AttributeKind;
use crate::error::{BedrockError, Result};
use crate::record::OtherHasher;

// ------------- UniqueConstraint -------------
/// A named uniqueness rule over an ordered set of attributes of one record
/// type. No two persisted records of the type may share the value tuple;
/// a tuple with any absent attribute never collides.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    name: String,
    attributes: Vec<String>,
}

impl UniqueConstraint {
    pub fn new(name: &str, attributes: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}
impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name, self.attributes.join(", "))
    }
}

// ------------- RecordType -------------
#[derive(Debug)]
pub struct RecordType {
    name: String,
    attributes: HashMap<String, AttributeKind, OtherHasher>,
    constraints: Vec<UniqueConstraint>,
}

impl RecordType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            attributes: HashMap::default(),
            constraints: Vec::new(),
        }
    }
    pub fn with_attribute(mut self, name: &str, kind: AttributeKind) -> Self {
        self.attributes.insert(name.to_owned(), kind);
        self
    }
    pub fn with_unique(mut self, name: &str, attributes: &[&str]) -> Self {
        self.constraints.push(UniqueConstraint::new(name, attributes));
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn attribute(&self, name: &str) -> Option<AttributeKind> {
        self.attributes.get(name).copied()
    }
    pub fn attributes(&self) -> &HashMap<String, AttributeKind, OtherHasher> {
        &self.attributes
    }
    pub fn constraints(&self) -> &[UniqueConstraint] {
        &self.constraints
    }
}

// ------------- Schema -------------
#[derive(Debug, Default)]
pub struct Schema {
    types: HashMap<String, Arc<RecordType>, OtherHasher>,
}

impl Schema {
    pub fn new() -> Self {
        Self {
            types: HashMap::default(),
        }
    }
    /// Register a record type. Every constraint must cover only declared
    /// attributes, and type names must be unique within the schema.
    pub fn register(&mut self, record_type: RecordType) -> Result<()> {
        for constraint in record_type.constraints() {
            for attribute in constraint.attributes() {
                if record_type.attribute(attribute).is_none() {
                    return Err(BedrockError::Invariant(format!(
                        "constraint '{}' on type '{}' covers undeclared attribute '{}'",
                        constraint.name(),
                        record_type.name(),
                        attribute
                    )));
                }
            }
        }
        match self.types.entry(record_type.name().to_owned()) {
            Entry::Vacant(e) => {
                e.insert(Arc::new(record_type));
                Ok(())
            }
            Entry::Occupied(_) => Err(BedrockError::Invariant(format!(
                "record type '{}' is already registered",
                record_type.name()
            ))),
        }
    }
    pub fn record_type(&self, name: &str) -> Option<Arc<RecordType>> {
        self.types.get(name).map(Arc::clone)
    }
    pub fn require(&self, name: &str) -> Result<Arc<RecordType>> {
        self.record_type(name)
            .ok_or_else(|| BedrockError::NotFound(format!("record type '{}'", name)))
    }
    pub fn len(&self) -> usize {
        self.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
