use std::time::Duration;

use apex::error::{RegistryError, ToolError};
use apex::model::{ToolArgs, ToolCallRequest};
use apex::tools::{ParamSpec, ParamType, RegistryBuilder, ToolSpec};
use serde_json::{json, Value};

const T: Duration = Duration::from_secs(1);

fn set_timer() -> ToolSpec {
    ToolSpec::new("set_timer", "Start a countdown timer", |args: ToolArgs| async move {
        let minutes = args.get("minutes").and_then(Value::as_i64).unwrap_or(0);
        let label = args.get("label").and_then(Value::as_str).unwrap_or("timer");
        Ok::<_, String>(format!("{label} set for {minutes} min"))
    })
    .param(ParamSpec::required("minutes", ParamType::Integer, "Duration in minutes"))
    .param(ParamSpec::optional("label", ParamType::String, "Name for the timer"))
}

#[test]
fn schema_lists_parameters() {
    let mut builder = RegistryBuilder::new();
    builder.register(set_timer()).unwrap();
    let registry = builder.build();

    let schemas = registry.list_schemas();
    assert_eq!(schemas.len(), 1);
    let params = &schemas[0].parameters;
    assert_eq!(params["type"], "object");
    assert_eq!(params["properties"]["minutes"]["type"], "integer");
    assert_eq!(params["required"], json!(["minutes"]));
    assert_eq!(params["additionalProperties"], json!(false));
}

#[test]
fn duplicate_names_are_rejected() {
    let mut builder = RegistryBuilder::new();
    builder.register(set_timer()).unwrap();
    let err = builder.register(set_timer()).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateTool("set_timer".into()));
}

#[tokio::test]
async fn optional_parameters_may_be_omitted_or_null() {
    let mut builder = RegistryBuilder::new();
    builder.register(set_timer()).unwrap();
    let registry = builder.build();

    let out = registry.invoke("set_timer", json!({"minutes": 10}), T).await.unwrap();
    assert_eq!(out, "timer set for 10 min");
    let out = registry
        .invoke("set_timer", json!({"minutes": 3, "label": null}), T)
        .await
        .unwrap();
    assert_eq!(out, "timer set for 3 min");
}

#[tokio::test]
async fn wrong_types_and_unknown_parameters_fail_validation() {
    let mut builder = RegistryBuilder::new();
    builder.register(set_timer()).unwrap();
    let registry = builder.build();

    for args in [
        json!({"minutes": "ten"}),
        json!({"minutes": 1.5}),
        json!({}),
        json!({"minutes": 5, "volume": 11}),
        json!(["minutes", 5]),
    ] {
        let err = registry.invoke("set_timer", args.clone(), T).await.unwrap_err();
        assert!(
            matches!(err, ToolError::InvalidArguments { .. }),
            "expected invalid arguments for {args}"
        );
    }
}

#[tokio::test]
async fn panicking_handler_becomes_error_result() {
    let mut builder = RegistryBuilder::new();
    builder
        .register(ToolSpec::new("crash", "Panics", |_args: ToolArgs| async {
            if true {
                panic!("boom");
            }
            Ok::<_, String>(String::new())
        }))
        .unwrap();
    let registry = builder.build();

    let result = registry
        .execute(
            &ToolCallRequest {
                call_id: "c9".into(),
                tool_name: "crash".into(),
                arguments: json!({}),
            },
            T,
        )
        .await;
    assert!(result.is_error);
    assert_eq!(result.call_id, "c9");
    assert!(result.result_text.starts_with("Error: tool crash failed"));
}
