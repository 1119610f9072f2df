//! Integration tests for Error
//!
//! Tests error kinds, messages, context frames, and the configuration taxonomy.

use strata_foundation::{Entity, Error, ErrorContext, ErrorKind, Type};

#[test]
fn messages_name_the_offender() {
    let err = Error::type_mismatch("speed", Type::Float, Type::String);
    assert_eq!(err.to_string(), "type mismatch for speed: expected float, got string");

    let err = Error::entity_not_found(Entity::new(9));
    assert_eq!(err.to_string(), "entity not found: Entity(9)");
}

#[test]
fn frames_accumulate_in_order() {
    let err = Error::transaction("boom").in_frame("transaction spawn").in_frame("system ai");
    let context = err.context.unwrap();
    assert_eq!(context.stack, vec!["transaction spawn", "system ai"]);
}

#[test]
fn explicit_context_replaces_frames() {
    let err = Error::precondition("diverged")
        .with_context(ErrorContext::new().with_source("undo").with_frame("replay"));
    let context = err.context.unwrap();
    assert_eq!(context.source.as_deref(), Some("undo"));
    assert_eq!(context.stack, vec!["replay"]);
}

#[test]
fn configuration_errors_are_classified() {
    assert!(Error::schema_conflict("component", "position").is_configuration());
    assert!(Error::unknown_transaction("spawn").is_configuration());
    assert!(Error::new(ErrorKind::PluginOrder { section: "extends", after: "components" }).is_configuration());
    assert!(Error::new(ErrorKind::CircularDependency).is_configuration());

    assert!(!Error::precondition("diverged").is_configuration());
    assert!(!Error::transaction("declined").is_configuration());
    assert!(!Error::new(ErrorKind::Async("closed".into())).is_configuration());
}
