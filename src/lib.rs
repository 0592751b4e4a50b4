//! Bedrock – a schema-driven record core with context-scoped identity.
//!
//! Bedrock centers on the *record* concept: a typed, mutable attribute bag
//! whose identity is scoped to the unit of work that produced it:
//! * A [`record::RecordKey`] pairs a declared type name with an identity
//!   (a simple `u64`).
//! * A [`schema::RecordType`] declares attribute kinds and named
//!   uniqueness constraints over attribute tuples.
//! * A [`record::RecordContext`] is a unit-of-work scope with identity-map
//!   semantics: within one context, `(type, id)` maps to exactly one live
//!   [`record::Record`] instance.
//! * A [`bean::Bean`] is a path-addressed node in a lazily-materialized
//!   navigation tree that may back onto records or other data.
//!
//! Records are created unsaved or loaded as lazily-resolved placeholders;
//! commits validate every pending record against the type's uniqueness
//! constraints before anything is persisted, all-or-nothing per batch.
//!
//! ## Modules
//! * [`schema`] – Declared record types, attribute kinds, unique constraints.
//! * [`datatype`] – The [`datatype::AttributeValue`] scalars (string,
//!   integer, decimal, boolean, time, bytes) and record references.
//! * [`record`] – Records, contexts, identity generation and commit.
//! * [`constraint`] – Uniqueness validation of pending batches.
//! * [`persist`] – The [`persist::BackingStore`] capability and its SQLite
//!   implementation, including the tamper-evident commit ledger.
//! * [`bean`] – The hierarchical bean repository with capability morphing.
//! * [`convert`] – Cycle-safe JSON projection of the record graph.
//!
//! ## Persistence
//! The [`persist::SqliteStore`] encapsulates SQLite schema creation and
//! durable storage for records and their attributes. A [`record::Database`]
//! wires a store together with a schema and restores retained identities on
//! startup; every commit appends to a blake3-chained ledger.
//!
//! ## Quick Start
//! ```
//! use bedrock::datatype::AttributeKind;
//! use bedrock::persist::PersistenceMode;
//! use bedrock::record::Database;
//! use bedrock::schema::{RecordType, Schema};
//!
//! let mut schema = Schema::new();
//! schema
//!     .register(
//!         RecordType::new("Account")
//!             .with_attribute("email", AttributeKind::String)
//!             .with_unique("uniqueEmail", &["email"]),
//!     )
//!     .unwrap();
//! let db = Database::new(schema, PersistenceMode::InMemory).unwrap();
//! let context = db.context();
//! let account = context.create_record("Account").unwrap();
//! context
//!     .set_attribute(&account, "email", "a@x.com".into())
//!     .unwrap();
//! context.commit().unwrap();
//! ```
//!
//! ## Concurrency
//! A context is scoped to one logical operation end-to-end; distinct
//! contexts may run concurrently against the same store, and commit is
//! serialized there so two contexts racing on the same constraint tuple
//! cannot both win. Abandoning a context simply discards it; nothing is
//! visible outside a context until its commit succeeds.

pub mod bean;
pub mod constraint;
pub mod convert;
pub mod datatype;
pub mod error;
pub mod persist;
pub mod record;
pub mod schema;
pub mod settings;
pub mod telemetry;
