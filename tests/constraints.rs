use bedrock::datatype::AttributeKind;
use bedrock::error::BedrockError;
use bedrock::persist::PersistenceMode;
use bedrock::record::Database;
use bedrock::schema::{RecordType, Schema};

fn account_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .register(
            RecordType::new("Account")
                .with_attribute("email", AttributeKind::String)
                .with_attribute("name", AttributeKind::String)
                .with_unique("uniqueEmail", &["email"]),
        )
        .expect("schema");
    schema
}

fn setup() -> Database {
    Database::new(account_schema(), PersistenceMode::InMemory).expect("db")
}

fn commit_account(db: &Database, email: &str) -> Result<u64, BedrockError> {
    let context = db.context();
    let account = context.create_record("Account")?;
    context.set_attribute(&account, "email", email.into())?;
    context.commit()?;
    Ok(account.id())
}

#[test]
fn duplicate_email_violates_unique_constraint() {
    let db = setup();
    commit_account(&db, "a@x.com").expect("first commit");
    let err = commit_account(&db, "a@x.com").unwrap_err();
    match &err {
        BedrockError::ConstraintViolation { constraint, .. } => {
            assert_eq!(constraint, "uniqueEmail");
        }
        other => panic!("expected ConstraintViolation, got {other}"),
    }
    let message = err.to_string();
    assert!(
        message.contains("uniqueEmail") && message.contains("a@x.com"),
        "the message must name the constraint and the colliding tuple: {message}"
    );
}

#[test]
fn distinct_emails_commit_cleanly() {
    let db = setup();
    commit_account(&db, "a@x.com").expect("first");
    commit_account(&db, "b@x.com").expect("second");
}

#[test]
fn updating_a_record_does_not_collide_with_itself() {
    let db = setup();
    let id = commit_account(&db, "a@x.com").expect("commit");
    let context = db.context();
    let account = context.record("Account", id).expect("record");
    context
        .set_attribute(&account, "name", "Alice".into())
        .expect("set");
    context
        .commit()
        .expect("re-committing the same email on the same identity must pass");
}

#[test]
fn absent_tuple_attributes_never_collide() {
    // SQL null semantics: two accounts without an email are not duplicates
    let db = setup();
    let context = db.context();
    let first = context.create_record("Account").expect("create");
    let second = context.create_record("Account").expect("create");
    context
        .set_attribute(&first, "name", "Alice".into())
        .expect("set");
    context
        .set_attribute(&second, "name", "Bob".into())
        .expect("set");
    context.commit().expect("commit");
}

#[test]
fn intra_batch_collision_fails_whole_batch() {
    let db = setup();
    let context = db.context();
    let first = context.create_record("Account").expect("create");
    let second = context.create_record("Account").expect("create");
    context
        .set_attribute(&first, "email", "a@x.com".into())
        .expect("set");
    context
        .set_attribute(&second, "email", "a@x.com".into())
        .expect("set");
    let err = context.commit().unwrap_err();
    assert!(matches!(err, BedrockError::ConstraintViolation { .. }));

    // all-or-nothing: neither record reached the store
    let reader = db.context();
    for id in [first.id(), second.id()] {
        let ghost = reader.record("Account", id).expect("placeholder");
        let err = reader.attribute(&ghost, "email").unwrap_err();
        assert!(
            matches!(err, BedrockError::NotFound(_)),
            "record {id} must not have been persisted"
        );
    }
}

#[test]
fn commit_time_recheck_catches_interleaved_writer() {
    // both contexts stage their record before either commits; the second
    // commit must observe the first one's row and lose
    let db = setup();
    let first = db.context();
    let second = db.context();
    let a = first.create_record("Account").expect("create");
    let b = second.create_record("Account").expect("create");
    first
        .set_attribute(&a, "email", "race@x.com".into())
        .expect("set");
    second
        .set_attribute(&b, "email", "race@x.com".into())
        .expect("set");
    first.commit().expect("first writer wins");
    let err = second.commit().unwrap_err();
    assert!(matches!(err, BedrockError::ConstraintViolation { .. }));
}

#[test]
fn concurrent_commit_race_has_exactly_one_winner() {
    let db = setup();
    let outcomes: Vec<Result<(), BedrockError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                scope.spawn(move || {
                    let context = db.context();
                    let account = context.create_record("Account")?;
                    context.set_attribute(&account, "email", "race@x.com".into())?;
                    context.commit()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });
    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1, "exactly one of two racing commits may succeed");
    let loser = outcomes
        .into_iter()
        .find(|outcome| outcome.is_err())
        .expect("one loser")
        .unwrap_err();
    assert!(matches!(loser, BedrockError::ConstraintViolation { .. }));
}

#[test]
fn abandoned_context_leaves_no_trace() {
    let db = setup();
    {
        let context = db.context();
        let account = context.create_record("Account").expect("create");
        context
            .set_attribute(&account, "email", "gone@x.com".into())
            .expect("set");
        // dropped without commit
    }
    commit_account(&db, "gone@x.com").expect("the abandoned record must not block the tuple");
}
