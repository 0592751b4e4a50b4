use bedrock::datatype::{AttributeKind, AttributeValue};
use bedrock::error::BedrockError;
use bedrock::persist::PersistenceMode;
use bedrock::record::Database;
use bedrock::schema::{RecordType, Schema};

use std::sync::Arc;

fn account_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .register(
            RecordType::new("Account")
                .with_attribute("email", AttributeKind::String)
                .with_attribute("name", AttributeKind::String)
                .with_attribute("age", AttributeKind::Integer),
        )
        .expect("schema");
    schema
}

fn setup() -> Database {
    Database::new(account_schema(), PersistenceMode::InMemory).expect("db")
}

#[test]
fn same_identity_converges_on_one_instance() {
    let db = setup();
    let context = db.context();
    let first = context.record("Account", 1).expect("record");
    let second = context.record("Account", 1).expect("record");
    assert!(
        Arc::ptr_eq(&first, &second),
        "two lookups of (Account, 1) must return the same instance"
    );
}

#[test]
fn created_record_is_registered_immediately() {
    let db = setup();
    let context = db.context();
    let created = context.create_record("Account").expect("create");
    let looked_up = context
        .record("Account", created.id())
        .expect("lookup of created identity");
    assert!(Arc::ptr_eq(&created, &looked_up));
    assert!(created.is_fresh().expect("state"));
    assert!(created.is_dirty().expect("state"));
}

#[test]
fn unknown_record_type_is_not_found() {
    let db = setup();
    let context = db.context();
    let err = context.record("Nonexistent", 1).unwrap_err();
    assert!(matches!(err, BedrockError::NotFound(_)));
    let err = context.create_record("Nonexistent").unwrap_err();
    assert!(matches!(err, BedrockError::NotFound(_)));
}

#[test]
fn placeholder_with_missing_identity_fails_on_first_read() {
    let db = setup();
    let context = db.context();
    // registering the placeholder performs no backing store call
    let ghost = context.record("Account", 999).expect("placeholder");
    assert!(!ghost.is_resolved().expect("state"));
    let err = context.attribute(&ghost, "email").unwrap_err();
    assert!(matches!(err, BedrockError::NotFound(_)));
    assert!(
        err.to_string().contains("Account#999"),
        "the error should name the missing identity: {err}"
    );
}

#[test]
fn placeholder_resolves_committed_state() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    context
        .set_attribute(&account, "email", "a@x.com".into())
        .expect("set");
    context.commit().expect("commit");

    // a later context loads a fresh copy lazily
    let later = db.context();
    let loaded = later.record("Account", account.id()).expect("record");
    assert!(!loaded.is_resolved().expect("state"));
    let email = later.attribute(&loaded, "email").expect("read");
    assert_eq!(email, Some(AttributeValue::String("a@x.com".to_owned())));
    assert!(loaded.is_resolved().expect("state"));
    assert!(!loaded.is_dirty().expect("state"));
}

#[test]
fn set_attribute_rejects_mismatched_kind() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    let err = context
        .set_attribute(&account, "age", "not a number".into())
        .unwrap_err();
    match err {
        BedrockError::TypeMismatch {
            attribute,
            expected,
            found,
        } => {
            assert_eq!(attribute, "age");
            assert_eq!(expected, "integer");
            assert_eq!(found, "string");
        }
        other => panic!("expected TypeMismatch, got {other}"),
    }
}

#[test]
fn undeclared_attribute_is_rejected() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    let err = context
        .set_attribute(&account, "shoe_size", AttributeValue::Integer(43))
        .unwrap_err();
    assert!(matches!(err, BedrockError::NotFound(_)));
    let err = context.attribute(&account, "shoe_size").unwrap_err();
    assert!(matches!(err, BedrockError::NotFound(_)));
}

#[test]
fn partial_update_merges_onto_stored_state() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    context
        .set_attribute(&account, "email", "a@x.com".into())
        .expect("set");
    context
        .set_attribute(&account, "name", "Alice".into())
        .expect("set");
    context.commit().expect("commit");
    let id = account.id();

    // a second context updates one attribute only
    let updater = db.context();
    let loaded = updater.record("Account", id).expect("record");
    updater
        .set_attribute(&loaded, "name", "Alicia".into())
        .expect("set");
    updater.commit().expect("commit");

    let reader = db.context();
    let fresh = reader.record("Account", id).expect("record");
    assert_eq!(
        reader.attribute(&fresh, "email").expect("read"),
        Some(AttributeValue::String("a@x.com".to_owned())),
        "untouched attribute must survive a partial update"
    );
    assert_eq!(
        reader.attribute(&fresh, "name").expect("read"),
        Some(AttributeValue::String("Alicia".to_owned()))
    );
}

#[test]
fn distinct_contexts_own_distinct_instances() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    context
        .set_attribute(&account, "email", "a@x.com".into())
        .expect("set");
    context.commit().expect("commit");

    let first = db.context();
    let second = db.context();
    let from_first = first.record("Account", account.id()).expect("record");
    let from_second = second.record("Account", account.id()).expect("record");
    assert!(
        !Arc::ptr_eq(&from_first, &from_second),
        "records must never be shared across contexts"
    );
}

#[test]
fn absent_attribute_reads_as_none() {
    let db = setup();
    let context = db.context();
    let account = context.create_record("Account").expect("create");
    context
        .set_attribute(&account, "email", "a@x.com".into())
        .expect("set");
    assert_eq!(context.attribute(&account, "name").expect("read"), None);
}
