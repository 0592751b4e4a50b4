use std::sync::{Arc, Mutex};

// other keepers use HashSet or HashMap
use core::hash::BuildHasherDefault;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

use tracing::{debug, info};

// our own stuff that we need
use crate::constraint;
use crate::datatype::AttributeValue;
use crate::error::{BedrockError, Result, lock};
use crate::persist::{BackingStore, PendingWrite, PersistenceMode, SqliteStore};
use crate::schema::Schema;
use crate::settings::Settings;

// ------------- Identity -------------
pub type Identity = u64;

pub type KeyHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: Identity = 0;

/// Hands out record identities. Identities are reserved the moment a record
/// is created, but nothing reaches the backing store until a commit; restoring
/// an existing store retains its identities so new ones never collide.
#[derive(Debug)]
pub struct IdGenerator {
    lower_bound: Identity,
    retained: HashSet<Identity, KeyHasher>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            retained: HashSet::default(),
        }
    }
    pub fn retain(&mut self, id: Identity) {
        self.retained.insert(id);
        if id > self.lower_bound {
            self.lower_bound = id;
        }
    }
    pub fn generate(&mut self) -> Identity {
        self.lower_bound += 1;
        self.retained.insert(self.lower_bound);
        self.lower_bound
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- RecordKey -------------
/// The context-scoped identity of a record: its declared type name paired
/// with an identity. Printed and parsed as `Type#id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    record_type: String,
    id: Identity,
}

impl RecordKey {
    pub fn new(record_type: &str, id: Identity) -> Self {
        Self {
            record_type: record_type.to_owned(),
            id,
        }
    }
    pub fn record_type(&self) -> &str {
        &self.record_type
    }
    pub fn id(&self) -> Identity {
        self.id
    }
    pub fn parse(s: &str) -> Option<RecordKey> {
        let (record_type, id) = s.rsplit_once('#')?;
        if record_type.is_empty() {
            return None;
        }
        Some(RecordKey {
            record_type: record_type.to_owned(),
            id: id.parse().ok()?,
        })
    }
}
impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.record_type, self.id)
    }
}

// ------------- Record -------------
// A record is either a placeholder bound to an identity or a resolved
// attribute bag. Resolution is an explicit operation on the owning context,
// never a hidden side effect of a getter.
#[derive(Debug)]
enum Payload {
    Unresolved,
    Resolved {
        attributes: HashMap<String, AttributeValue, OtherHasher>,
    },
}

#[derive(Debug)]
struct RecordState {
    payload: Payload,
    dirty: bool,
    fresh: bool,
}

/// A typed, mutable attribute bag. Owned exclusively by the
/// [`RecordContext`] that created or loaded it; all reads and writes go
/// through that context's accessors.
#[derive(Debug)]
pub struct Record {
    key: RecordKey,
    state: Mutex<RecordState>,
}

impl Record {
    fn placeholder(key: RecordKey) -> Record {
        Record {
            key,
            state: Mutex::new(RecordState {
                payload: Payload::Unresolved,
                dirty: false,
                fresh: false,
            }),
        }
    }
    fn fresh(key: RecordKey) -> Record {
        Record {
            key,
            state: Mutex::new(RecordState {
                payload: Payload::Resolved {
                    attributes: HashMap::default(),
                },
                dirty: true,
                fresh: true,
            }),
        }
    }
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
    pub fn record_type(&self) -> &str {
        self.key.record_type()
    }
    pub fn id(&self) -> Identity {
        self.key.id()
    }
    pub fn is_resolved(&self) -> Result<bool> {
        Ok(matches!(
            lock(&self.state)?.payload,
            Payload::Resolved { .. }
        ))
    }
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(lock(&self.state)?.dirty)
    }
    pub fn is_fresh(&self) -> Result<bool> {
        Ok(lock(&self.state)?.fresh)
    }
    fn is_pending(&self) -> Result<bool> {
        let state = lock(&self.state)?;
        Ok(state.dirty || state.fresh)
    }
    fn install(&self, attributes: HashMap<String, AttributeValue, OtherHasher>) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.payload = Payload::Resolved { attributes };
        Ok(())
    }
    fn attribute_value(&self, name: &str) -> Result<Option<AttributeValue>> {
        match &lock(&self.state)?.payload {
            Payload::Resolved { attributes } => Ok(attributes.get(name).cloned()),
            Payload::Unresolved => Err(BedrockError::Invariant(format!(
                "attribute read on unresolved record {}",
                self.key
            ))),
        }
    }
    fn write_attribute(&self, name: &str, value: AttributeValue) -> Result<()> {
        let mut state = lock(&self.state)?;
        match &mut state.payload {
            Payload::Resolved { attributes } => {
                attributes.insert(name.to_owned(), value);
            }
            Payload::Unresolved => {
                return Err(BedrockError::Invariant(format!(
                    "attribute write on unresolved record {}",
                    self.key
                )));
            }
        }
        state.dirty = true;
        Ok(())
    }
    fn snapshot(&self) -> Result<HashMap<String, AttributeValue, OtherHasher>> {
        match &lock(&self.state)?.payload {
            Payload::Resolved { attributes } => Ok(attributes.clone()),
            Payload::Unresolved => Err(BedrockError::Invariant(format!(
                "snapshot of unresolved record {}",
                self.key
            ))),
        }
    }
    fn mark_clean(&self) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.dirty = false;
        state.fresh = false;
        Ok(())
    }
}
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

// ------------- Database -------------
/// Shared wiring for contexts: the schema, the backing store and the
/// identity generator. Cheap to clone; every clone refers to the same store.
#[derive(Clone)]
pub struct Database {
    schema: Arc<Schema>,
    store: Arc<dyn BackingStore>,
    generator: Arc<Mutex<IdGenerator>>,
}

impl Database {
    pub fn new(schema: Schema, mode: PersistenceMode) -> Result<Database> {
        let store = SqliteStore::open(mode)?;
        Database::with_store(schema, store)
    }
    pub fn from_settings(schema: Schema, settings: &Settings) -> Result<Database> {
        Database::new(schema, settings.persistence_mode())
    }
    /// Wire a database over an already-open backing store, restoring the
    /// identities it retains so freshly generated ones never collide.
    pub fn with_store(schema: Schema, store: Arc<dyn BackingStore>) -> Result<Database> {
        let mut generator = IdGenerator::new();
        for id in store.retained_identities()? {
            generator.retain(id);
        }
        Ok(Database {
            schema: Arc::new(schema),
            store,
            generator: Arc::new(Mutex::new(generator)),
        })
    }
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }
    /// Open a unit-of-work scope. Contexts are created at the start of one
    /// logical operation and discarded at its end; abandoning one has no
    /// side effects because nothing is visible outside it until commit.
    pub fn context(&self) -> RecordContext {
        RecordContext {
            schema: Arc::clone(&self.schema),
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            kept: Mutex::new(HashMap::default()),
        }
    }
}

// ------------- RecordContext -------------
/// A unit-of-work scope with identity-map semantics: within one context,
/// `(type, id)` maps to exactly one live [`Record`] instance. Not meant to
/// be shared between threads of control; open one per logical operation.
pub struct RecordContext {
    schema: Arc<Schema>,
    store: Arc<dyn BackingStore>,
    generator: Arc<Mutex<IdGenerator>>,
    kept: Mutex<HashMap<RecordKey, Arc<Record>, KeyHasher>>,
}

impl RecordContext {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    /// Return the cached instance for `(record_type, id)` or register a
    /// lazily-populated placeholder. The placeholder lands in the identity
    /// map before any backing store call, so lookups for the same identity
    /// always converge on one instance.
    pub fn record(&self, record_type: &str, id: Identity) -> Result<Arc<Record>> {
        self.schema.require(record_type)?;
        let key = RecordKey::new(record_type, id);
        let mut kept = lock(&self.kept)?;
        let record = match kept.entry(key.clone()) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => Arc::clone(e.insert(Arc::new(Record::placeholder(key)))),
        };
        Ok(record)
    }
    /// Allocate a new record with a reserved identity. The record is
    /// registered in the identity map immediately but stays invisible to
    /// other contexts until this one commits.
    pub fn create_record(&self, record_type: &str) -> Result<Arc<Record>> {
        self.schema.require(record_type)?;
        let id = lock(&self.generator)?.generate();
        let key = RecordKey::new(record_type, id);
        let record = Arc::new(Record::fresh(key.clone()));
        lock(&self.kept)?.insert(key, Arc::clone(&record));
        Ok(record)
    }
    /// Whether the identity is already known, either to this context or to
    /// the backing store.
    pub fn record_exists(&self, key: &RecordKey) -> Result<bool> {
        if lock(&self.kept)?.contains_key(key) {
            return Ok(true);
        }
        Ok(self.store.fetch(key)?.is_some())
    }
    /// Typed read. The first read of a placeholder synchronously resolves it
    /// from the backing store and may block for the duration of that I/O.
    pub fn attribute(&self, record: &Record, name: &str) -> Result<Option<AttributeValue>> {
        let record_type = self.schema.require(record.record_type())?;
        if record_type.attribute(name).is_none() {
            return Err(BedrockError::NotFound(format!(
                "attribute '{}' of record type '{}'",
                name,
                record.record_type()
            )));
        }
        self.resolve(record)?;
        record.attribute_value(name)
    }
    /// All attributes of the record, resolving it first if needed.
    pub fn attributes(
        &self,
        record: &Record,
    ) -> Result<HashMap<String, AttributeValue, OtherHasher>> {
        self.resolve(record)?;
        record.snapshot()
    }
    /// Typed write; marks the record dirty. Placeholders resolve before the
    /// write so a later commit persists the merged state, not a reset.
    pub fn set_attribute(&self, record: &Record, name: &str, value: AttributeValue) -> Result<()> {
        let record_type = self.schema.require(record.record_type())?;
        let declared = record_type.attribute(name).ok_or_else(|| {
            BedrockError::NotFound(format!(
                "attribute '{}' of record type '{}'",
                name,
                record.record_type()
            ))
        })?;
        if value.kind() != declared {
            return Err(BedrockError::TypeMismatch {
                attribute: name.to_owned(),
                expected: declared.to_string(),
                found: value.kind().to_string(),
            });
        }
        self.resolve(record)?;
        record.write_attribute(name, value)
    }
    fn resolve(&self, record: &Record) -> Result<()> {
        if record.is_resolved()? {
            return Ok(());
        }
        match self.store.fetch(record.key())? {
            Some(attributes) => {
                debug!(record = %record.key(), "resolved from backing store");
                record.install(attributes)
            }
            None => Err(BedrockError::NotFound(format!("record {}", record.key()))),
        }
    }
    /// The records this context would persist on commit.
    pub fn pending(&self) -> Result<Vec<Arc<Record>>> {
        let kept = lock(&self.kept)?;
        let mut pending = Vec::new();
        for record in kept.values() {
            if record.is_pending()? {
                pending.push(Arc::clone(record));
            }
        }
        Ok(pending)
    }
    /// Validate and persist every dirty or fresh record in one atomic batch.
    /// If any record fails any constraint, nothing is persisted.
    pub fn commit(&self) -> Result<()> {
        let pending = self.pending()?;
        if pending.is_empty() {
            debug!("commit with no pending records");
            return Ok(());
        }
        let mut snapshots = Vec::with_capacity(pending.len());
        for record in &pending {
            snapshots.push((Arc::clone(record), record.snapshot()?));
        }
        let probes = constraint::validate_batch(&self.schema, self.store.as_ref(), &snapshots)?;
        let mut writes = Vec::with_capacity(snapshots.len());
        for (record, attributes) in &snapshots {
            let mut values: Vec<(String, AttributeValue)> = attributes
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            // sorted so the ledger digest is stable across map iteration orders
            values.sort_by(|a, b| a.0.cmp(&b.0));
            writes.push(PendingWrite {
                key: record.key().clone(),
                fresh: record.is_fresh()?,
                attributes: values,
            });
        }
        writes.sort_by(|a, b| a.key.cmp(&b.key));
        self.store.persist_batch(&writes, &probes)?;
        for (record, _) in &snapshots {
            record.mark_clean()?;
        }
        info!(records = writes.len(), "commit complete");
        Ok(())
    }
}
