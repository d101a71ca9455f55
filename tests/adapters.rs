use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use txn_kernel_rs::demo::{register_demo, DemoDatabase, NotValidError};
use txn_kernel_rs::{
    AdapterKind, Builder, Callable, Declaration, Error, EventLog, Registry, Reply, StepCall,
    StepOptions, StepOutcome,
};

fn demo() -> (Registry, DemoDatabase) {
    let registry = Registry::new();
    let database = register_demo(&registry);
    (registry, database)
}

fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn scoped_transaction(entries: Arc<Mutex<Vec<String>>>) -> Callable {
    Callable::around(move |input, next| {
        entries.lock().unwrap().push("begin".to_string());
        let result = next.proceed(Ok(input))?;
        let end = if result.is_ok() { "commit" } else { "rollback" };
        entries.lock().unwrap().push(end.to_string());
        Ok(result)
    })
}

#[test]
fn around_step_wraps_the_rest_of_the_pipeline() -> Result<()> {
    let (registry, database) = demo();
    let entries = journal();
    let sequence = Builder::new()
        .around("transaction")
        .map("process")
        .try_step("validate", StepOptions::new().catch::<NotValidError>())
        .tee("persist")
        .inject("transaction", scoped_transaction(entries.clone()))
        .build(&registry)?;

    let value = sequence
        .call(json!({"name": "Jane", "email": "jane@doe.com"}))?
        .unwrap();
    assert_eq!(value, json!({"name": "Jane", "email": "jane@doe.com"}));
    assert_eq!(*entries.lock().unwrap(), vec!["begin", "commit"]);
    assert_eq!(database.rows().len(), 1);
    Ok(())
}

#[test]
fn failures_inside_around_keep_the_inner_step() -> Result<()> {
    let (registry, _) = demo();
    let entries = journal();
    let sequence = Builder::new()
        .around("transaction")
        .map("process")
        .try_step("validate", StepOptions::new().catch::<NotValidError>())
        .inject("transaction", scoped_transaction(entries.clone()))
        .build(&registry)?;

    let failure = sequence.call(json!({"name": "Jane"}))?.unwrap_err();
    assert_eq!(failure.step_name(), "validate");
    assert!(failure.value().is_error::<NotValidError>());
    assert_eq!(*entries.lock().unwrap(), vec!["begin", "rollback"]);
    Ok(())
}

#[test]
fn around_continuation_runs_only_once() -> Result<()> {
    let (registry, database) = demo();
    let sequence = Builder::new()
        .around("twice")
        .tee("persist")
        .inject(
            "twice",
            Callable::around(|input, next| {
                let first = next.proceed(Ok(input.clone()))?;
                let second = next.proceed(Ok(input))?;
                assert!(next.invoked());
                assert_eq!(first, second);
                Ok(second)
            }),
        )
        .build(&registry)?;

    sequence.call(json!({"id": 1}))?.unwrap();
    assert_eq!(database.rows(), vec![json!({"id": 1})]);
    Ok(())
}

#[test]
fn continuation_is_not_rerun_after_an_aborted_first_call() -> Result<()> {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let sequence = Builder::new()
        .around("retry")
        .map("flaky")
        .inject(
            "retry",
            Callable::around(|input, next| {
                let _ = next.proceed(Ok(input.clone()));
                Ok(next.proceed(Ok(input))?)
            }),
        )
        .inject(
            "flaky",
            Callable::unary(move |_| {
                *counter.lock().unwrap() += 1;
                Err::<Value, _>(anyhow!("connection reset"))
            }),
        )
        .build(&Registry::new())?;

    let err = sequence.call(json!(1)).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStep { ref step, ref reason }
            if step == "retry" && reason == "continuation already invoked"
    ));
    assert_eq!(*calls.lock().unwrap(), 1);
    Ok(())
}

#[test]
fn around_step_can_short_circuit() -> Result<()> {
    let (registry, database) = demo();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let sequence = Builder::new()
        .around("gate")
        .map("count")
        .tee("persist")
        .inject(
            "gate",
            Callable::around(|input, _next| Ok(Reply::failure(input))),
        )
        .inject(
            "count",
            Callable::unary(move |input| {
                *counter.lock().unwrap() += 1;
                Ok(input)
            }),
        )
        .build(&registry)?;

    let failure = sequence.call(json!({"id": 7}))?.unwrap_err();
    assert_eq!(failure.step_name(), "gate");
    assert!(failure == json!({"id": 7}));
    assert_eq!(*calls.lock().unwrap(), 0);
    assert!(database.rows().is_empty());
    Ok(())
}

#[test]
fn around_and_plain_operations_are_not_interchangeable() -> Result<()> {
    let (registry, _) = demo();

    let err = Builder::new().around("upcase").build(&registry).unwrap_err();
    assert!(matches!(err, Error::InvalidStep { ref step, .. } if step == "upcase"));

    let err = Builder::new()
        .map("wrap")
        .inject("wrap", scoped_transaction(journal()))
        .build(&registry)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStep { ref step, .. } if step == "wrap"));
    Ok(())
}

#[test]
fn try_step_without_catch_list_is_rejected() -> Result<()> {
    let (registry, _) = demo();
    let err = Builder::new()
        .try_step("validate", StepOptions::new())
        .build(&registry)
        .unwrap_err();
    assert!(matches!(err, Error::MissingCatchList { ref step } if step == "validate"));
    Ok(())
}

#[test]
fn try_step_can_remap_the_captured_error() -> Result<()> {
    let (registry, _) = demo();
    let sequence = Builder::new()
        .try_step(
            "validate",
            StepOptions::new()
                .catch::<NotValidError>()
                .raise(|err| anyhow!("invalid signup: {err}")),
        )
        .build(&registry)?;

    let failure = sequence.call(json!({"name": "Jane"}))?.unwrap_err();
    assert_eq!(failure.value().to_json(), json!("invalid signup: email required"));
    assert!(!failure.value().is_error::<NotValidError>());
    Ok(())
}

#[test]
fn uncaught_errors_surface_as_operation_errors() -> Result<()> {
    let (registry, database) = demo();
    let sequence = Builder::new()
        .try_step(
            "validate",
            StepOptions::new().catch::<std::num::ParseIntError>(),
        )
        .tee("persist")
        .build(&registry)?;

    let err = sequence.call(json!({"name": "Jane"})).unwrap_err();
    match err {
        Error::Operation { step, source } => {
            assert_eq!(step, "validate");
            assert!(source.is::<NotValidError>());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(database.rows().is_empty());
    Ok(())
}

#[test]
fn check_step_passes_or_rejects_its_input() -> Result<()> {
    let sequence = Builder::new()
        .check("adult")
        .inject(
            "adult",
            Callable::unary(|person| Ok(person["age"].as_u64().unwrap_or(0) >= 18)),
        )
        .build(&Registry::new())?;

    assert_eq!(
        sequence.call(json!({"age": 30}))?.unwrap(),
        json!({"age": 30})
    );
    let failure = sequence.call(json!({"age": 12}))?.unwrap_err();
    assert!(failure == "adult");
    assert!(failure == json!({"age": 12}));
    Ok(())
}

#[test]
fn check_step_rejects_non_boolean_replies() -> Result<()> {
    let sequence = Builder::new()
        .check("confused")
        .inject("confused", Callable::unary(|_| Ok(json!("maybe"))))
        .build(&Registry::new())?;
    let err = sequence.call(json!(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidResult { ref step, .. } if step == "confused"));
    Ok(())
}

#[test]
fn map_and_raw_steps_enforce_their_reply_shape() -> Result<()> {
    let sequence = Builder::new()
        .step("plain")
        .inject("plain", Callable::unary(|v| Ok(v)))
        .build(&Registry::new())?;
    assert!(matches!(
        sequence.call(json!(1)).unwrap_err(),
        Error::InvalidResult { .. }
    ));

    let sequence = Builder::new()
        .map("decided")
        .inject("decided", Callable::unary(|v| Ok(Reply::success(v))))
        .build(&Registry::new())?;
    assert!(matches!(
        sequence.call(json!(1)).unwrap_err(),
        Error::InvalidResult { .. }
    ));
    Ok(())
}

#[test]
fn tee_emits_its_input_and_ignores_the_reply() -> Result<()> {
    let (registry, database) = demo();
    let sequence = Builder::new().tee("persist").map("upcase").build(&registry)?;
    assert_eq!(sequence.call(json!("saved"))?.unwrap(), json!("SAVED"));
    assert_eq!(database.rows(), vec![json!("saved")]);
    Ok(())
}

#[test]
fn custom_adapter_kinds_can_be_registered() -> Result<()> {
    let (registry, _) = demo();
    let queue: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = queue.clone();
    let log = EventLog::new();
    let sequence = Builder::new()
        .adapter(
            "enqueue",
            move |call: StepCall<'_>| -> txn_kernel_rs::Result<StepOutcome> {
                match call.invoke()? {
                    Reply::Value(value) => {
                        sink.lock().unwrap().push(value);
                        Ok(Ok(call.input.clone()))
                    }
                    Reply::Outcome(outcome) => Ok(outcome),
                }
            },
        )
        .map("process")
        .custom("enqueue", "upcase_name")
        .declare(Declaration::new(AdapterKind::Tee, "persist"))
        .inject(
            "upcase_name",
            Callable::unary(|input| {
                Ok(json!(input["name"].as_str().unwrap_or_default().to_uppercase()))
            }),
        )
        .listener(log.clone())
        .build(&registry)?;

    let value = sequence
        .call(json!({"name": "Jane", "email": "jane@doe.com"}))?
        .unwrap();
    assert_eq!(value, json!({"name": "Jane", "email": "jane@doe.com"}));
    assert_eq!(*queue.lock().unwrap(), vec![json!("JANE")]);
    assert_eq!(sequence.step("upcase_name").unwrap().kind().as_str(), "enqueue");
    assert_eq!(log.events().len(), 6);
    Ok(())
}

#[test]
fn unknown_adapter_kinds_are_rejected() -> Result<()> {
    let (registry, _) = demo();
    let err = Builder::new()
        .custom("enqueue", "upcase")
        .build(&registry)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAdapter(ref kind) if kind == "enqueue"));
    Ok(())
}
