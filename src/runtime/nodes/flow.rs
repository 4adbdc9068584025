/// Flow-control nodes: `if-else`, `switch`, `merge`

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use super::{data::compare, NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::{
    runtime::expression::{lookup_path, to_display_string},
    workflow::types::MAIN_HANDLE,
};

pub struct FlowExecutor;

impl NodeExecutor for FlowExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        _ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match call.node_type {
                "if-else" => Ok(if_else(call, inputs)),
                "switch" => Ok(switch(call, inputs)),
                "merge" => merge(call, inputs),
                other => Err(call.fail(format!("Unknown flow node type: {}", other))),
            }
        })
    }
}

/// Loose truthiness used for `condition` properties
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            !(s.is_empty() || s == "false" || s == "0" || s == "no")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn field_value(input: &Value, field: &str) -> Value {
    lookup_path(input, field).unwrap_or(Value::Null)
}

fn if_else(call: &NodeCall<'_>, inputs: &NodeInputs) -> Value {
    let input = inputs.main().clone();

    let result = if let Some(condition) = call.property("condition") {
        is_truthy(condition)
    } else if let Some(field) = call.str_property("field") {
        let operator = call.string_or("operator", "equals");
        let expected = call.property("value").cloned().unwrap_or(Value::Null);
        compare(&field_value(&input, field), &operator, &expected)
    } else {
        is_truthy(&input)
    };

    tracing::debug!("🔀 if-else {} evaluated to {}", call.node_id, result);

    let (on_true, on_false) = if result {
        (input.clone(), Value::Null)
    } else {
        (Value::Null, input.clone())
    };

    json!({
        "main": input,
        "true": on_true,
        "false": on_false,
        "result": result,
    })
}

fn case_values(cases: Option<&Value>) -> Vec<Value> {
    match cases {
        Some(Value::Array(items)) => items
            .iter()
            .map(|case| case.get("value").cloned().unwrap_or_else(|| case.clone()))
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

fn switch(call: &NodeCall<'_>, inputs: &NodeInputs) -> Value {
    let input = inputs.main().clone();
    let subject = match call.str_property("field") {
        Some(field) => field_value(&input, field),
        None => input.clone(),
    };
    let subject = to_display_string(&subject).to_lowercase();

    let cases = case_values(call.property("cases"));
    let matched = cases
        .iter()
        .position(|case| to_display_string(case).to_lowercase() == subject);

    tracing::debug!("🔀 switch {} matched case {:?}", call.node_id, matched);

    let mut output = Map::new();
    output.insert(MAIN_HANDLE.to_string(), input.clone());
    for index in 0..cases.len() {
        let payload = if matched == Some(index) { input.clone() } else { Value::Null };
        output.insert(format!("output{}", index), payload);
    }
    output.insert(
        "fallback".to_string(),
        if matched.is_none() { input } else { Value::Null },
    );
    output.insert("matched".to_string(), matched.map_or(Value::Null, |i| json!(i)));
    Value::Object(output)
}

fn merge(call: &NodeCall<'_>, inputs: &NodeInputs) -> Result<Value> {
    let mode = call.string_or("mode", "merge");
    let merged = match mode.as_str() {
        "merge" => inputs.main().clone(),
        "append" => Value::Array(inputs.sources.iter().map(|(_, payload)| payload.clone()).collect()),
        other => return Err(call.fail(format!("Unsupported merge mode: {}", other))),
    };

    tracing::debug!("🔗 merge {} combined {} inputs ({})", call.node_id, inputs.sources.len(), mode);
    Ok(json!({ "main": merged }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::test_support::{main_input, run, Fixture};

    #[tokio::test]
    async fn test_if_else_routes_by_field_comparison() {
        let fixture = Fixture::new();
        let props = json!({"field": "age", "operator": "greaterThan", "value": 18});

        let out = run(&FlowExecutor, "if-else", props.clone(), &main_input(json!({"age": 30})), &fixture)
            .await
            .unwrap();
        assert_eq!(out["result"], true);
        assert_eq!(out["true"], json!({"age": 30}));
        assert!(out["false"].is_null());

        let out = run(&FlowExecutor, "if-else", props, &main_input(json!({"age": 12})), &fixture)
            .await
            .unwrap();
        assert_eq!(out["result"], false);
        assert_eq!(out["false"], json!({"age": 12}));
        assert_eq!(out["main"], json!({"age": 12}));
    }

    #[tokio::test]
    async fn test_if_else_condition_property() {
        let fixture = Fixture::new();
        let out = run(&FlowExecutor, "if-else", json!({"condition": "false"}), &main_input(json!(1)), &fixture)
            .await
            .unwrap();
        assert_eq!(out["result"], false);
    }

    #[tokio::test]
    async fn test_switch_matches_case_insensitively() {
        let fixture = Fixture::new();
        let props = json!({"field": "kind", "cases": ["bug", {"value": "Feature"}]});

        let out = run(&FlowExecutor, "switch", props.clone(), &main_input(json!({"kind": "feature"})), &fixture)
            .await
            .unwrap();
        assert_eq!(out["matched"], 1);
        assert!(out["output0"].is_null());
        assert_eq!(out["output1"]["kind"], "feature");
        assert!(out["fallback"].is_null());

        let out = run(&FlowExecutor, "switch", props, &main_input(json!({"kind": "chore"})), &fixture)
            .await
            .unwrap();
        assert!(out["matched"].is_null());
        assert_eq!(out["fallback"]["kind"], "chore");
    }

    #[tokio::test]
    async fn test_merge_modes() {
        let fixture = Fixture::new();
        let inputs = NodeInputs {
            main: Some(json!({"a": 2, "b": 3})),
            sources: vec![("x".into(), json!({"a": 1})), ("y".into(), json!({"a": 2, "b": 3}))],
            ..Default::default()
        };

        let out = run(&FlowExecutor, "merge", json!({}), &inputs, &fixture).await.unwrap();
        assert_eq!(out["main"], json!({"a": 2, "b": 3}));

        let out = run(&FlowExecutor, "merge", json!({"mode": "append"}), &inputs, &fixture)
            .await
            .unwrap();
        assert_eq!(out["main"], json!([{"a": 1}, {"a": 2, "b": 3}]));

        assert!(run(&FlowExecutor, "merge", json!({"mode": "zip"}), &inputs, &fixture).await.is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!("0")));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(0.5)));
    }
}
