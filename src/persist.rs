// used for persistence
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::constraint::ConstraintProbe;
use crate::datatype::AttributeValue;
use crate::error::{Result, lock};
use crate::record::{Identity, OtherHasher, RecordKey};

// ------------- Persistence mode -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Pending writes -------------
/// One record of a batch handed to [`BackingStore::persist_batch`]: the full
/// merged attribute state, sorted by attribute name.
#[derive(Debug)]
pub struct PendingWrite {
    pub key: RecordKey,
    pub fresh: bool,
    pub attributes: Vec<(String, AttributeValue)>,
}

// ------------- Backing store -------------
/// The abstract capability the record core consumes: fetch-by-identity,
/// query-by-attribute-tuple for constraint checks, and atomic batch persist.
/// Transport failures surface as [`crate::error::BedrockError::Persistence`]
/// and are left to the caller's retry policy.
pub trait BackingStore: Send + Sync {
    fn fetch(&self, key: &RecordKey)
    -> Result<Option<HashMap<String, AttributeValue, OtherHasher>>>;
    /// The identity of a committed record of the probe's type sharing the
    /// probe's value tuple, excluding the probed record itself.
    fn find_by_tuple(&self, probe: &ConstraintProbe) -> Result<Option<Identity>>;
    /// Persist a validated batch atomically. The probes are re-checked
    /// inside the write transaction; a conflict fails the whole batch with
    /// the probe's violation.
    fn persist_batch(&self, batch: &[PendingWrite], probes: &[ConstraintProbe]) -> Result<()>;
    fn retained_identities(&self) -> Result<Vec<Identity>>;
    /// Head of the tamper-evident commit ledger, if any batch has been
    /// persisted.
    fn ledger_head(&self) -> Result<Option<String>>;
}

// ------------- SQLite store -------------
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(mode: PersistenceMode) -> Result<Arc<SqliteStore>> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists Record (
                Record_Identity integer not null,
                Record_Type text not null,
                constraint unique_and_referenceable_Record_Identity primary key (
                    Record_Identity
                )
            );
            create table if not exists Attribute (
                Record_Identity integer not null,
                Attribute text not null,
                Value any null,
                ValueType integer not null,
                constraint Attribute_belongs_to_Record foreign key (
                    Record_Identity
                ) references Record(Record_Identity),
                constraint unique_Attribute_per_Record primary key (
                    Record_Identity,
                    Attribute
                )
            );
            create table if not exists Ledger (
                Ledger_Sequence integer not null,
                Batch_Digest text not null,
                Superhash text not null,
                constraint referenceable_Ledger_Sequence primary key (
                    Ledger_Sequence
                )
            );
            ",
        )?;
        Ok(Arc::new(SqliteStore {
            connection: Mutex::new(connection),
        }))
    }

    fn probe_statement(arity: usize) -> String {
        let mut predicates = Vec::with_capacity(arity);
        for _ in 0..arity {
            predicates.push("(a.Attribute = ? and a.Value = ? and a.ValueType = ?)");
        }
        format!(
            "
            select r.Record_Identity
                from Record r
                where r.Record_Type = ?
                and r.Record_Identity <> ?
                and (select count(*)
                        from Attribute a
                        where a.Record_Identity = r.Record_Identity
                        and ({})) = {}
                limit 1
            ",
            predicates.join(" or "),
            arity
        )
    }

    fn run_probe(connection: &Connection, probe: &ConstraintProbe) -> Result<Option<Identity>> {
        let sql = Self::probe_statement(probe.values().len());
        let mut statement = connection.prepare_cached(&sql)?;
        let mut parameters: Vec<SqlValue> = Vec::with_capacity(2 + probe.values().len() * 3);
        parameters.push(SqlValue::Text(probe.record().record_type().to_owned()));
        parameters.push(SqlValue::Integer(probe.record().id() as i64));
        for (attribute, value) in probe.attributes().iter().zip(probe.values()) {
            parameters.push(SqlValue::Text(attribute.clone()));
            parameters.push(value.to_sql_value());
            parameters.push(SqlValue::Integer(i64::from(value.kind().tag())));
        }
        let existing = statement
            .query_row(params_from_iter(parameters), |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(existing.map(|id| id as Identity))
    }

    fn append_ledger(connection: &Connection, batch: &[PendingWrite]) -> Result<()> {
        let mut hasher = blake3::Hasher::new();
        for write in batch {
            hasher.update(write.key.to_string().as_bytes());
            for (attribute, value) in &write.attributes {
                hasher.update(attribute.as_bytes());
                hasher.update(value.to_string().as_bytes());
            }
        }
        let digest = hasher.finalize();
        let head: Option<(i64, String)> = connection
            .prepare_cached(
                "
                select Ledger_Sequence, Superhash
                    from Ledger
                    order by Ledger_Sequence desc
                    limit 1
            ",
            )?
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let (sequence, previous) = match head {
            Some((sequence, superhash)) => (sequence + 1, superhash),
            None => (1, String::new()),
        };
        let mut chain = blake3::Hasher::new();
        chain.update(previous.as_bytes());
        chain.update(digest.as_bytes());
        let superhash = chain.finalize();
        connection.execute(
            "
            insert into Ledger (
                Ledger_Sequence,
                Batch_Digest,
                Superhash
            ) values (?, ?, ?)
        ",
            params![
                sequence,
                digest.to_hex().as_str(),
                superhash.to_hex().as_str()
            ],
        )?;
        Ok(())
    }
}

impl BackingStore for SqliteStore {
    fn fetch(
        &self,
        key: &RecordKey,
    ) -> Result<Option<HashMap<String, AttributeValue, OtherHasher>>> {
        let connection = lock(&self.connection)?;
        let record_type: Option<String> = connection
            .prepare_cached(
                "
                select Record_Type
                    from Record
                    where Record_Identity = ?
            ",
            )?
            .query_row(params![key.id()], |row| row.get(0))
            .optional()?;
        match record_type {
            Some(stored) if stored == key.record_type() => (),
            // the identity is absent, or retained under another type
            _ => return Ok(None),
        }
        let mut statement = connection.prepare_cached(
            "
            select Attribute, Value, ValueType
                from Attribute
                where Record_Identity = ?
        ",
        )?;
        let mut rows = statement.query(params![key.id()])?;
        let mut attributes: HashMap<String, AttributeValue, OtherHasher> = HashMap::default();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let tag: i64 = row.get(2)?;
            let value = AttributeValue::from_sql(tag as u8, &row.get_ref(1)?)?;
            attributes.insert(name, value);
        }
        Ok(Some(attributes))
    }

    fn find_by_tuple(&self, probe: &ConstraintProbe) -> Result<Option<Identity>> {
        let connection = lock(&self.connection)?;
        Self::run_probe(&connection, probe)
    }

    fn persist_batch(&self, batch: &[PendingWrite], probes: &[ConstraintProbe]) -> Result<()> {
        let mut connection = lock(&self.connection)?;
        let tx = connection.transaction()?;
        // Optimistic re-check: the probes that passed validation are re-run
        // while this store holds the write transaction, so of two racing
        // contexts exactly one can commit a given tuple.
        for probe in probes {
            if let Some(existing) = Self::run_probe(&tx, probe)? {
                warn!(
                    constraint = probe.constraint(),
                    record = %probe.record(),
                    existing,
                    "commit-time uniqueness conflict"
                );
                return Err(probe.violation());
            }
        }
        for write in batch {
            tx.execute(
                "
                insert into Record (
                    Record_Identity,
                    Record_Type
                ) values (?, ?)
                on conflict (Record_Identity) do nothing
            ",
                params![write.key.id(), write.key.record_type()],
            )?;
            // fresh records have no attribute rows to clear
            if !write.fresh {
                tx.execute(
                    "
                    delete from Attribute
                        where Record_Identity = ?
                ",
                    params![write.key.id()],
                )?;
            }
            for (attribute, value) in &write.attributes {
                tx.execute(
                    "
                    insert into Attribute (
                        Record_Identity,
                        Attribute,
                        Value,
                        ValueType
                    ) values (?, ?, ?, ?)
                ",
                    params![
                        write.key.id(),
                        attribute,
                        value.to_sql_value(),
                        value.kind().tag()
                    ],
                )?;
            }
        }
        Self::append_ledger(&tx, batch)?;
        tx.commit()?;
        info!(records = batch.len(), "batch persisted");
        Ok(())
    }

    fn retained_identities(&self) -> Result<Vec<Identity>> {
        let connection = lock(&self.connection)?;
        let mut statement = connection.prepare_cached(
            "
            select Record_Identity
                from Record
        ",
        )?;
        let rows = statement.query_map([], |row| row.get::<_, i64>(0))?;
        let mut identities = Vec::new();
        for id in rows {
            identities.push(id? as Identity);
        }
        Ok(identities)
    }

    fn ledger_head(&self) -> Result<Option<String>> {
        let connection = lock(&self.connection)?;
        let head = connection
            .prepare_cached(
                "
                select Superhash
                    from Ledger
                    order by Ledger_Sequence desc
                    limit 1
            ",
            )?
            .query_row([], |row| row.get(0))
            .optional()?;
        Ok(head)
    }
}
