//! Integration tests for JSON pattern documents and the compile command.

#![allow(clippy::unwrap_used, clippy::panic)]

use quarry::cli::{Target, compile_output, open_session};
use quarry::config::Config;
use quarry::document::{Document, DocumentError};
use quarry::{AppError, Override};
use quarry_core::{
    Answer, Constraint, DataType, Label, Pattern, QuarryError, Session, TransactionKind, Variable,
    WriteMode, label, var,
};
use std::collections::BTreeSet;
use std::path::Path;

const SCHEMA: &str = r#"{
  "pattern": {"and": [
    {"label": "name", "sub": "attribute", "datatype": "string"},
    {"label": "spouse", "sub": "role"},
    {"label": "person", "sub": "entity", "owns": ["name"], "plays": ["spouse"]},
    {"label": "marriage", "sub": "relation", "relates": ["spouse"]}
  ]}
}"#;

const PEOPLE: &str = r#"{
  "pattern": {"and": [
    {"var": "$x", "isa": "person", "has": [{"type": "name", "attribute": "Alice"}]},
    {"var": "$y", "isa": "person", "has": [{"type": "name", "attribute": "Bob"}]},
    {"var": "$m", "isa": "marriage", "rel": [
      {"role": "spouse", "player": "$x"},
      {"role": "spouse", "player": "$y"}
    ]}
  ]}
}"#;

fn memory_session(mode: TransactionKind) -> Session {
    let config = Config::from_toml(
        quarry::config::DEFAULT_CONFIG,
        Path::new("/"),
        &[Override::new("storage.backend", "memory")],
    )
    .unwrap();
    open_session(&config, mode).unwrap()
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn test_statement_fields_map_to_builders() {
    let doc = Document::from_json(
        r#"{"pattern": {"label": "name", "sub": "attribute", "datatype": "string", "regex": "[A-Z].*"}}"#,
    )
    .unwrap();
    let expected = label("name")
        .sub("attribute")
        .and_then(|s| s.datatype(DataType::String))
        .and_then(|s| s.regex("[A-Z].*"))
        .unwrap();
    assert_eq!(doc.to_pattern().unwrap(), Pattern::from(expected));
}

#[test]
fn test_references_distinguish_variables_and_labels() {
    let doc = Document::from_json(
        r#"{"pattern": {"var": "$r", "rel": [{"role": "spouse", "player": "$x"}, "$y"]}}"#,
    )
    .unwrap();
    let expected = var("r")
        .rel_role("spouse", var("x"))
        .and_then(|s| s.rel(var("y")))
        .unwrap();
    assert_eq!(doc.to_pattern().unwrap(), Pattern::from(expected));
}

#[test]
fn test_value_predicates_and_dates() {
    let doc = Document::from_json(
        r#"{"pattern": {"or": [
            {"var": "$a", "value": {"op": ">", "value": 10}},
            {"var": "$b", "value": {"date": 86400000}}
        ]}}"#,
    )
    .unwrap();
    let pattern = doc.to_pattern().unwrap();
    assert_eq!(pattern.normal_form().len(), 2);
    assert_eq!(
        pattern.variables(),
        [Variable::named("a"), Variable::named("b")]
            .into_iter()
            .collect::<BTreeSet<_>>()
    );
}

#[test]
fn test_has_variable_and_via() {
    let doc = Document::from_json(
        r#"{"pattern": {"var": "$x", "has": [{"type": "name", "attribute": "$n", "via": "$r"}]}}"#,
    )
    .unwrap();
    let pattern = doc.to_pattern().unwrap();
    let vars = pattern.variables();
    for name in ["x", "n", "r"] {
        assert!(vars.contains(&Variable::named(name)), "missing ${name}");
    }
    let Pattern::Statement(statement) = pattern else {
        panic!("expected a statement");
    };
    assert!(
        statement
            .constraints()
            .any(|c| matches!(c, Constraint::HasAttribute { .. }))
    );
}

#[test]
fn test_bound_variables() {
    let doc = Document::from_json(r#"{"pattern": {"var": "$x"}, "bound": {"x": 7}}"#).unwrap();
    let bound = doc.bound();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound.get(&Variable::named("x")).map(|id| id.0), Some(7));
}

#[test]
fn test_errors_surface() {
    let unknown_field = Document::from_json(r#"{"pattern": {"var": "$x", "colour": "red"}}"#);
    assert!(matches!(unknown_field, Err(DocumentError::Json(_))));

    let datatype = Document::from_json(r#"{"pattern": {"label": "x", "datatype": "blob"}}"#)
        .unwrap()
        .to_pattern();
    assert_eq!(datatype, Err(DocumentError::UnknownDataType("blob".to_string())));

    let op = Document::from_json(r#"{"pattern": {"var": "$v", "value": {"op": "~", "value": 1}}}"#)
        .unwrap()
        .to_pattern();
    assert_eq!(op, Err(DocumentError::UnknownComparator("~".to_string())));

    let vacuous = Document::from_json(r#"{"pattern": {"and": []}}"#)
        .unwrap()
        .to_pattern();
    assert_eq!(
        vacuous,
        Err(DocumentError::Pattern(QuarryError::VacuousComposition(
            "conjunction"
        )))
    );

    let conflict = Document::from_json(
        r#"{"pattern": {"var": "$x", "isa": "person", "isa-explicit": "person"}}"#,
    )
    .unwrap()
    .to_pattern();
    assert!(matches!(
        conflict,
        Err(DocumentError::Pattern(QuarryError::ConflictingConstraints { .. }))
    ));
}

#[test]
fn test_from_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("schema.json");
    std::fs::write(&path, SCHEMA).unwrap();
    let doc = Document::from_file(&path).unwrap();
    assert_eq!(doc.to_pattern().unwrap().normal_form().len(), 1);

    let missing = Document::from_file(&temp.path().join("nope.json"));
    assert!(matches!(missing, Err(DocumentError::Io { .. })));
}

// =============================================================================
// END TO END
// =============================================================================

#[test]
fn test_define_then_insert_through_documents() {
    let mut session = memory_session(TransactionKind::Schema);
    let schema = Document::from_json(SCHEMA).unwrap();
    session
        .write(WriteMode::Define, &schema.to_pattern().unwrap(), &Answer::new())
        .unwrap();

    session.begin(TransactionKind::Data);
    let people = Document::from_json(PEOPLE).unwrap();
    let answers = session
        .write(WriteMode::Insert, &people.to_pattern().unwrap(), &people.bound())
        .unwrap();
    assert_eq!(answers.len(), 1);
    for name in ["x", "y", "m"] {
        assert!(answers[0].contains(&Variable::named(name)));
    }

    let person = session.lookup_label(&Label::new("person")).unwrap().unwrap();
    assert_eq!(session.instance_count(person).unwrap(), 2);
    let name = session.lookup_label(&Label::new("name")).unwrap().unwrap();
    assert_eq!(session.instance_count(name).unwrap(), 2);
}

#[test]
fn test_schema_document_needs_schema_transaction() {
    let mut session = memory_session(TransactionKind::Data);
    let schema = Document::from_json(SCHEMA).unwrap();
    let err = session
        .write(WriteMode::Define, &schema.to_pattern().unwrap(), &Answer::new())
        .unwrap_err();
    assert!(matches!(err, QuarryError::TransactionKind { .. }));
}

#[test]
fn test_compile_targets() {
    let people = Document::from_json(PEOPLE).unwrap();
    let pattern = people.to_pattern().unwrap();
    let bound = people.bound();

    let fragments = compile_output(&pattern, &bound, Target::Fragments, WriteMode::Insert).unwrap();
    assert_eq!(fragments.len(), 1);
    assert!(!fragments[0].is_empty());

    let steps = compile_output(&pattern, &bound, Target::Steps, WriteMode::Insert).unwrap();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].lines().count() >= 3);

    let atoms = compile_output(&pattern, &bound, Target::Atoms, WriteMode::Insert).unwrap();
    assert_eq!(atoms.len(), 1);
}

#[test]
fn test_compile_steps_reports_malformed_reference() {
    let doc = Document::from_json(
        r#"{"pattern": {"var": "$m", "isa": "marriage", "rel": [{"role": "spouse", "player": "$z"}]}}"#,
    )
    .unwrap();
    let err = compile_output(
        &doc.to_pattern().unwrap(),
        &doc.bound(),
        Target::Steps,
        WriteMode::Insert,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        AppError::Core(QuarryError::MalformedReference { .. })
    ));
}
