use bedrock::bean::{
    BEAN_TYPE_RECORD, BeanResolver, Capability, Morphable, RecordSource, StaticNode, StaticSource,
};
use bedrock::datatype::{AttributeKind, AttributeValue};
use bedrock::error::BedrockError;
use bedrock::persist::PersistenceMode;
use bedrock::record::Database;
use bedrock::schema::{RecordType, Schema};

use std::sync::Arc;

fn static_resolver() -> Arc<BeanResolver> {
    let root = StaticNode::new("", "folder")
        .with_child(
            StaticNode::new("a", "folder")
                .with_property("label", "top".into())
                .with_child(StaticNode::new("b", "folder").with_property("label", "nested".into())),
        )
        .with_child(StaticNode::new("c", "folder"));
    BeanResolver::new(StaticSource::new(root)).expect("resolver")
}

#[test]
fn path_is_parent_path_joined_with_name() {
    let resolver = static_resolver();
    let root = resolver.root();
    assert_eq!(root.path().expect("path"), "");
    let a = root.child("a").expect("walk").expect("a exists");
    assert_eq!(a.path().expect("path"), "/a");
    let b = a.child("b").expect("walk").expect("b exists");
    assert_eq!(
        b.path().expect("path"),
        format!("{}/{}", a.path().expect("path"), "b")
    );
}

#[test]
fn parent_points_back_up() {
    let resolver = static_resolver();
    let a = resolver.resolve("a").expect("walk").expect("a exists");
    let b = a.child("b").expect("walk").expect("b exists");
    assert_eq!(b.parent().expect("parent"), Some(a));
    assert_eq!(
        resolver.root().parent().expect("parent"),
        None,
        "the root has no parent"
    );
}

#[test]
fn missing_segment_resolves_to_absence() {
    let resolver = static_resolver();
    // "a" exists, the rest of the walk does not
    assert!(resolver.resolve("a").expect("walk").is_some());
    let absent = resolver.resolve("a/missing/b").expect("walk");
    assert!(absent.is_none(), "a missing segment is absence, not an error");
}

#[test]
fn malformed_paths_are_rejected_before_resolution() {
    let resolver = static_resolver();
    for path in ["a//b", "a\\b", "//", "a/ /b"] {
        let err = resolver.resolve(path).unwrap_err();
        assert!(
            matches!(err, BedrockError::MalformedPath { .. }),
            "path {path:?} must be rejected, got {err}"
        );
    }
}

#[test]
fn empty_and_separator_paths_address_the_root() {
    let resolver = static_resolver();
    assert_eq!(resolver.resolve("").expect("walk"), Some(resolver.root()));
    assert_eq!(resolver.resolve("/").expect("walk"), Some(resolver.root()));
}

#[test]
fn children_are_restartable_and_cached() {
    let resolver = static_resolver();
    let root = resolver.root();
    let first: Vec<_> = root.children().expect("children");
    let second: Vec<_> = root.children().expect("children");
    assert_eq!(first.len(), 2);
    assert_eq!(first, second, "re-obtained children are the same beans");
    // resolution through the cache converges on the same node
    let walked = root.child("a").expect("walk").expect("a");
    let resolved = resolver.resolve("/a").expect("walk").expect("a");
    assert_eq!(walked, resolved);
}

#[test]
fn properties_and_get_alias() {
    let resolver = static_resolver();
    let a = resolver.resolve("a").expect("walk").expect("a");
    assert_eq!(
        a.property("label").expect("read"),
        Some(AttributeValue::String("top".to_owned()))
    );
    assert_eq!(a.get("label").expect("read"), a.property("label").expect("read"));
    assert_eq!(a.property("unknown").expect("read"), None);
    assert_eq!(a.properties().expect("read").len(), 1);
}

#[test]
fn morphing_unsupported_target_reports_absence() {
    let resolver = static_resolver();
    let a = resolver.resolve("a").expect("walk").expect("a");
    // static beans never back onto records
    assert!(!a.supports(Capability::Record).expect("supports"));
    assert!(a.morph(Capability::Record).expect("morph").is_none());
    // but they do carry properties
    let properties = a
        .morph(Capability::Properties)
        .expect("morph")
        .and_then(|morphed| morphed.into_properties())
        .expect("property view");
    assert_eq!(properties.len(), 1);
}

fn record_database() -> Database {
    let mut schema = Schema::new();
    schema
        .register(
            RecordType::new("Folder")
                .with_attribute("label", AttributeKind::String)
                .with_attribute("child", AttributeKind::Reference),
        )
        .expect("schema");
    Database::new(schema, PersistenceMode::InMemory).expect("db")
}

#[test]
fn record_backed_beans_expose_attributes_and_references() {
    let db = record_database();
    let writer = db.context();
    let parent = writer.create_record("Folder").expect("create");
    let child = writer.create_record("Folder").expect("create");
    writer
        .set_attribute(&parent, "label", "parent".into())
        .expect("set");
    writer
        .set_attribute(&child, "label", "child".into())
        .expect("set");
    writer
        .set_attribute(&parent, "child", child.key().clone().into())
        .expect("set");
    writer.commit().expect("commit");

    let source = RecordSource::new(
        db.context(),
        vec![("top".to_owned(), parent.key().clone())],
    );
    let resolver = BeanResolver::new(source).expect("resolver");
    let top = resolver.resolve("top").expect("walk").expect("top");
    assert_eq!(top.bean_type().expect("type"), BEAN_TYPE_RECORD);
    // scalar attributes surface as properties, references as children
    assert_eq!(
        top.property("label").expect("read"),
        Some(AttributeValue::String("parent".to_owned()))
    );
    assert_eq!(top.property("child").expect("read"), None);
    let nested = top.child("child").expect("walk").expect("reference child");
    assert_eq!(nested.path().expect("path"), "/top/child");
    assert_eq!(
        nested.property("label").expect("read"),
        Some(AttributeValue::String("child".to_owned()))
    );

    // morphing to the record capability yields the backing key
    let morphed = top
        .morph(Capability::Record)
        .expect("morph")
        .and_then(|morphed| morphed.into_record())
        .expect("record view");
    assert_eq!(morphed.key(), parent.key());
}
