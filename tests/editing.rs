use anyhow::Result;
use serde_json::json;
use txn_kernel_rs::demo::register_demo;
use txn_kernel_rs::{Builder, Error, Position, Registry, Sequence};

fn registry() -> Registry {
    let registry = Registry::new();
    register_demo(&registry);
    registry
}

fn shout(registry: &Registry) -> Result<Sequence> {
    Ok(Builder::new().map("upcase").map("reverse").build(registry)?)
}

#[test]
fn insert_before_a_step() -> Result<()> {
    let registry = registry();
    let base = shout(&registry)?;
    let other = Builder::new().map("exclaim_all").build(&registry)?;

    let edited = base.insert(&other, Position::before("reverse"))?;
    assert_eq!(edited.names(), vec!["upcase", "exclaim_all", "reverse"]);
    assert_eq!(edited.call(json!("hello world"))?.unwrap(), json!("!DLROW !OLLEH"));

    assert_eq!(base.names(), vec!["upcase", "reverse"]);
    assert_eq!(base.call(json!("hello world"))?.unwrap(), json!("DLROW OLLEH"));
    Ok(())
}

#[test]
fn insert_after_with_inline_definition() -> Result<()> {
    let registry = registry();
    let edited = shout(&registry)?.insert_with(Position::after("reverse"), &registry, |b| {
        b.map("exclaim_all")
    })?;
    assert_eq!(edited.names(), vec!["upcase", "reverse", "exclaim_all"]);
    assert_eq!(edited.call(json!("hello world"))?.unwrap(), json!("DLROW! OLLEH!"));
    Ok(())
}

#[test]
fn insert_at_unknown_step_is_rejected() -> Result<()> {
    let registry = registry();
    let other = Builder::new().map("exclaim_all").build(&registry)?;
    let err = shout(&registry)?
        .insert(&other, Position::before("missing"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownStep(ref name) if name == "missing"));
    assert!(err.is_argument_error());
    Ok(())
}

#[test]
fn remove_drops_named_steps() -> Result<()> {
    let registry = registry();
    let sequence = Builder::new()
        .map("upcase")
        .map("exclaim_all")
        .map("reverse")
        .build(&registry)?;

    let trimmed = sequence.remove(&["exclaim_all", "reverse"]);
    assert_eq!(trimmed.names(), vec!["upcase"]);
    assert_eq!(trimmed.call(json!("hello world"))?.unwrap(), json!("HELLO WORLD"));
    assert_eq!(sequence.len(), 3);

    let unchanged = sequence.remove(&["not_there"]);
    assert_eq!(unchanged.names(), sequence.names());
    Ok(())
}

#[test]
fn prepend_and_append() -> Result<()> {
    let registry = registry();
    let base = Builder::new().map("reverse").build(&registry)?;
    let exclaim = Builder::new().map("exclaim_all").build(&registry)?;

    let prepended = base.prepend_with(&registry, |b| b.map("upcase"))?;
    assert_eq!(prepended.call(json!("hello world"))?.unwrap(), json!("DLROW OLLEH"));

    let appended = prepended.append(&exclaim)?;
    assert_eq!(appended.names(), vec!["upcase", "reverse", "exclaim_all"]);
    assert_eq!(appended.call(json!("hello world"))?.unwrap(), json!("DLROW! OLLEH!"));

    let front = base.prepend(&exclaim)?;
    assert_eq!(front.names(), vec!["exclaim_all", "reverse"]);
    Ok(())
}

#[test]
fn merging_a_repeated_step_name_is_rejected() -> Result<()> {
    let registry = registry();
    let base = shout(&registry)?;
    let again = Builder::new().map("upcase").build(&registry)?;

    for result in [
        base.append(&again),
        base.prepend(&again),
        base.insert(&again, Position::after("upcase")),
    ] {
        assert!(matches!(result, Err(Error::DuplicateStep(ref name)) if name == "upcase"));
    }

    let err = Builder::new()
        .map("upcase")
        .map("upcase")
        .build(&registry)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateStep(_)));
    Ok(())
}

#[test]
fn inline_edit_without_steps_is_rejected() -> Result<()> {
    let registry = registry();
    let err = shout(&registry)?.append_with(&registry, |b| b).unwrap_err();
    assert!(matches!(err, Error::NoTransaction));
    assert!(err.is_argument_error());
    Ok(())
}
