/// Data transformation nodes
///
/// Pure transforms over the `main` input: `filter`, `edit-fields`, `code`
/// (sandboxed Lua via mlua), `text-transform` and the pass-through `notes`.

use anyhow::Result;
use futures::future::BoxFuture;
use mlua::{Lua, LuaSerdeExt};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::runtime::expression::{lookup_path, to_display_string};

/// Globals removed from every `code` node's Lua state
const SANDBOXED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "require", "load", "loadfile", "dofile", "loadstring", "collectgarbage",
];

static TEMPLATE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("template block pattern"));

pub struct DataExecutor {
    lua_memory_limit: usize,
}

impl DataExecutor {
    pub fn new(lua_memory_limit: usize) -> Self {
        Self { lua_memory_limit }
    }
}

impl NodeExecutor for DataExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        _ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match call.node_type {
                "filter" => filter(call, inputs.require_main(call.node_type)?),
                "edit-fields" => Ok(edit_fields(call, inputs.require_main(call.node_type)?)),
                "code" => self.code(call, inputs.require_main(call.node_type)?),
                "text-transform" => text_transform(call, inputs.require_main(call.node_type)?),
                "notes" => Ok(notes(call, inputs)),
                other => Err(call.fail(format!("Unknown data node type: {}", other))),
            }
        })
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Shared predicate of `filter` and `if-else`
///
/// String operators compare lower-cased string forms. Numeric operators need
/// both sides numeric (numbers or numeric strings) and are false otherwise.
/// Unknown operators keep the item.
pub(crate) fn compare(field_value: &Value, operator: &str, expected: &Value) -> bool {
    let actual = to_display_string(field_value).to_lowercase();
    let wanted = to_display_string(expected).to_lowercase();

    match operator {
        "equals" => actual == wanted,
        "notEquals" => actual != wanted,
        "contains" => actual.contains(&wanted),
        "greaterThan" => matches!((numeric(field_value), numeric(expected)), (Some(a), Some(b)) if a > b),
        "lessThan" => matches!((numeric(field_value), numeric(expected)), (Some(a), Some(b)) if a < b),
        _ => true,
    }
}

fn filter(call: &NodeCall<'_>, input: &Value) -> Result<Value> {
    let field = call
        .str_property("field")
        .ok_or_else(|| call.fail("No field specified for filter"))?;
    let operator = call.string_or("operator", "equals");
    let expected = call.property("value").cloned().unwrap_or_else(|| json!(""));

    let field_value = input
        .get(field)
        .cloned()
        .or_else(|| lookup_path(input, field))
        .unwrap_or_else(|| json!(""));
    let keep = compare(&field_value, &operator, &expected);

    tracing::debug!("🔍 Filter condition: {} {} {} = {}", field, operator, expected, keep);

    if keep {
        Ok(json!({ "main": input }))
    } else {
        Ok(json!({ "main": null }))
    }
}

/// Declared `{key, value}` pairs; also accepts a plain mapping
fn field_pairs(fields: Option<&Value>) -> Vec<(String, Value)> {
    match fields {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("key").and_then(Value::as_str).filter(|k| !k.is_empty())?;
                Some((key.to_string(), item.get("value").cloned().unwrap_or_else(|| json!(""))))
            })
            .collect(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Vec::new(),
    }
}

fn edit_fields(call: &NodeCall<'_>, input: &Value) -> Value {
    let mut output = match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let pairs = field_pairs(call.property("fields"));
    let count = pairs.len();
    output.extend(pairs);

    tracing::debug!("✏️ Edited {} fields", count);
    json!({ "main": output })
}

impl DataExecutor {
    fn code(&self, call: &NodeCall<'_>, input: &Value) -> Result<Value> {
        let language = call.string_or("language", "lua");
        let code = call
            .str_property("code")
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| call.fail("No code provided"))?;

        if language.to_lowercase() != "lua" {
            return Err(call.fail(format!("Unsupported language: {}", language)));
        }

        tracing::debug!("🧠 Executing Lua code node {}", call.node_id);
        let result = run_lua(code, input, self.lua_memory_limit)
            .map_err(|e| call.fail(format!("Lua code execution failed: {}", e)))?;

        Ok(json!({ "main": result }))
    }
}

/// Execute a script in a fresh sandboxed Lua state
///
/// The input is exposed as the globals `input` and `data`. The script's return
/// value wins, then a global `result`, then the untouched input.
fn run_lua(code: &str, input: &Value, memory_limit: usize) -> mlua::Result<Value> {
    let lua = Lua::new();
    lua.set_memory_limit(memory_limit)?;

    let globals = lua.globals();
    for name in SANDBOXED_GLOBALS {
        globals.set(*name, mlua::Value::Nil)?;
    }

    let lua_input = lua.to_value(input)?;
    globals.set("input", lua_input.clone())?;
    globals.set("data", lua_input)?;

    let returned: mlua::Value = lua.load(code).set_name("code").eval()?;
    let result = if returned.is_nil() {
        globals.get::<mlua::Value>("result")?
    } else {
        returned
    };

    if result.is_nil() {
        return Ok(input.clone());
    }
    lua.from_value(result)
}

/// Resolve one `{{ expr }}` of a text template
fn template_value(expr: &str, input: &Value) -> Option<String> {
    let (expr, default) = match expr.split_once("||") {
        Some((head, fallback)) => (
            head.trim(),
            Some(fallback.trim().trim_matches(|c| c == '\'' || c == '"').to_string()),
        ),
        None => (expr.trim(), None),
    };

    if let Some(path) = expr.strip_prefix("$json.") {
        let found = lookup_path(input, path).map(|v| to_display_string(&v));
        return Some(found.or(default).unwrap_or_default());
    }

    let candidates = [
        input.get(expr),
        input.get("data").and_then(|d| d.get("body")).and_then(|b| b.get(expr)),
        input.get("body").and_then(|b| b.get(expr)),
    ];
    candidates
        .into_iter()
        .flatten()
        .next()
        .map(to_display_string)
        .or(default)
}

fn render_template(template: &str, input: &Value) -> String {
    TEMPLATE_BLOCK
        .replace_all(template, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str());
            template_value(expr, input).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn text_transform(call: &NodeCall<'_>, input: &Value) -> Result<Value> {
    let operation = call.string_or("operation", "template");
    let source_text = || {
        call.str_property("text")
            .map(str::to_string)
            .unwrap_or_else(|| to_display_string(input.get("text").unwrap_or(input)))
    };

    let result = match operation.as_str() {
        "template" => match call.str_property("template") {
            Some(template) => render_template(template, input),
            None => to_display_string(input),
        },
        "uppercase" => source_text().to_uppercase(),
        "lowercase" => source_text().to_lowercase(),
        "capitalize" => capitalize(&source_text()),
        "replace" => {
            let text = source_text();
            match call.str_property("find") {
                Some(find) => text.replace(find, &call.string_or("replace", "")),
                None => text,
            }
        }
        "extract" => {
            let text = source_text();
            match call.str_property("pattern") {
                Some(pattern) => {
                    let regex = Regex::new(pattern)
                        .map_err(|e| call.fail(format!("Invalid pattern '{}': {}", pattern, e)))?;
                    regex
                        .captures(&text)
                        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                }
                None => text,
            }
        }
        "trim" => source_text().trim().to_string(),
        "concat" => {
            let pairs = field_pairs(call.property("fields"));
            if pairs.is_empty() {
                match input {
                    Value::Object(map) => map
                        .values()
                        .filter(|v| super::flow::is_truthy(v))
                        .map(to_display_string)
                        .collect::<Vec<_>>()
                        .join(" "),
                    other => to_display_string(other),
                }
            } else {
                pairs
                    .iter()
                    .filter_map(|(key, value)| match input.get(key) {
                        Some(found) => Some(to_display_string(found)),
                        None => Some(to_display_string(value)).filter(|s| !s.is_empty()),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
        _ => to_display_string(input),
    };

    tracing::debug!("🔤 Text transform ({}): {}", operation, result.chars().take(100).collect::<String>());

    Ok(json!({
        "main": {
            "text": result,
            "content": result,
            "output": result,
        }
    }))
}

fn notes(call: &NodeCall<'_>, inputs: &NodeInputs) -> Value {
    match call.str_property("content") {
        Some(content) => tracing::debug!("📝 Notes: {}", content.chars().take(50).collect::<String>()),
        None => tracing::debug!("📝 Empty notes"),
    }
    json!({ "main": inputs.main.clone().unwrap_or_else(|| json!({})) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::test_support::{main_input, run, Fixture};

    async fn data(node_type: &str, props: Value, input: Value) -> Result<Value> {
        let fixture = Fixture::new();
        run(&DataExecutor::new(8 * 1024 * 1024), node_type, props, &main_input(input), &fixture).await
    }

    #[tokio::test]
    async fn test_filter_keeps_or_drops() {
        let props = json!({"field": "status", "operator": "equals", "value": "active"});
        let kept = data("filter", props.clone(), json!({"status": "active"})).await.unwrap();
        assert_eq!(kept, json!({"main": {"status": "active"}}));

        let dropped = data("filter", props, json!({"status": "inactive"})).await.unwrap();
        assert_eq!(dropped, json!({"main": null}));
    }

    #[tokio::test]
    async fn test_filter_prefers_literal_key_over_path() {
        let props = json!({"field": "a.b", "operator": "equals", "value": "flat"});
        let kept = data("filter", props.clone(), json!({"a.b": "flat", "a": {"b": "nested"}})).await.unwrap();
        assert_eq!(kept["main"]["a.b"], "flat");

        let nested = data("filter", props, json!({"a": {"b": "flat"}})).await.unwrap();
        assert_eq!(nested["main"]["a"]["b"], "flat");
    }

    #[tokio::test]
    async fn test_filter_numeric_on_text_is_false() {
        let props = json!({"field": "age", "operator": "greaterThan", "value": 3});
        let out = data("filter", props, json!({"age": "many"})).await.unwrap();
        assert!(out["main"].is_null());
    }

    #[tokio::test]
    async fn test_filter_requires_main_and_field() {
        let fixture = Fixture::new();
        let err = run(&DataExecutor::new(1 << 20), "filter", json!({"field": "x"}), &NodeInputs::default(), &fixture)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required input: main");

        let err = data("filter", json!({}), json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "No field specified for filter");
    }

    #[test]
    fn test_compare_operators() {
        assert!(compare(&json!("Hello World"), "contains", &json!("world")));
        assert!(compare(&json!("a"), "notEquals", &json!("b")));
        assert!(compare(&json!("10"), "greaterThan", &json!(9)));
        assert!(compare(&json!(1), "lessThan", &json!("2")));
        assert!(compare(&json!("x"), "matchesSomehow", &json!("y")));
    }

    #[tokio::test]
    async fn test_edit_fields_merges_copy() {
        let props = json!({"fields": [{"key": "b", "value": 2}, {"key": "", "value": "skip"}]});
        let out = data("edit-fields", props, json!({"a": 1})).await.unwrap();
        assert_eq!(out["main"], json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_code_runs_lua() {
        let props = json!({"language": "lua", "code": "return { total = input.a + input.b }"});
        let out = data("code", props, json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out["main"]["total"], 5);

        let props = json!({"language": "lua", "code": "result = data.name .. '!'"});
        let out = data("code", props, json!({"name": "ada"})).await.unwrap();
        assert_eq!(out["main"], "ada!");

        let props = json!({"language": "lua", "code": "local x = 1"});
        let out = data("code", props, json!({"keep": true})).await.unwrap();
        assert_eq!(out["main"], json!({"keep": true}));
    }

    #[tokio::test]
    async fn test_code_is_sandboxed() {
        let props = json!({"language": "lua", "code": "return os.time()"});
        assert!(data("code", props, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_code_rejects_other_languages() {
        let err = data("code", json!({"language": "python", "code": "x = 1"}), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported language: python");

        let err = data("code", json!({"language": "lua"}), json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "No code provided");
    }

    #[tokio::test]
    async fn test_text_template_fallbacks() {
        let input = json!({"name": "Ada", "data": {"body": {"city": "London"}}, "profile": {"age": 36}});
        let props = json!({
            "operation": "template",
            "template": "{{ name }} from {{ city }}, {{ $json.profile.age }} {{ $json.missing || 'n/a' }} {{ nowhere }}"
        });
        let out = data("text-transform", props, input).await.unwrap();
        assert_eq!(out["main"]["text"], "Ada from London, 36 n/a {{ nowhere }}");
        assert_eq!(out["main"]["content"], out["main"]["text"]);
        assert_eq!(out["main"]["output"], out["main"]["text"]);
    }

    #[tokio::test]
    async fn test_text_operations() {
        let input = json!({"text": "  hello WORLD  "});
        let run_op = |props: Value| data("text-transform", props, input.clone());

        assert_eq!(run_op(json!({"operation": "uppercase"})).await.unwrap()["main"]["text"], "  HELLO WORLD  ");
        assert_eq!(run_op(json!({"operation": "trim"})).await.unwrap()["main"]["text"], "hello WORLD");
        assert_eq!(
            run_op(json!({"operation": "capitalize", "text": "hELLO"})).await.unwrap()["main"]["text"],
            "Hello"
        );
        assert_eq!(
            run_op(json!({"operation": "replace", "find": "WORLD", "replace": "there"})).await.unwrap()["main"]["text"],
            "  hello there  "
        );
        assert_eq!(
            run_op(json!({"operation": "extract", "text": "order #1234", "pattern": "#(\\d+)"})).await.unwrap()["main"]["text"],
            "1234"
        );
        assert!(run_op(json!({"operation": "extract", "pattern": "("})).await.is_err());
    }

    #[tokio::test]
    async fn test_concat() {
        let input = json!({"first": "Ada", "last": "Lovelace", "empty": ""});
        let out = data("text-transform", json!({"operation": "concat"}), input.clone()).await.unwrap();
        assert_eq!(out["main"]["text"], "Ada Lovelace");

        let props = json!({"operation": "concat", "fields": [{"key": "last"}, {"key": "title", "value": "Countess"}]});
        let out = data("text-transform", props, input).await.unwrap();
        assert_eq!(out["main"]["text"], "Lovelace Countess");
    }

    #[tokio::test]
    async fn test_notes_pass_through_without_input() {
        let fixture = Fixture::new();
        let out = run(&DataExecutor::new(1 << 20), "notes", json!({"content": "doc"}), &NodeInputs::default(), &fixture)
            .await
            .unwrap();
        assert_eq!(out, json!({"main": {}}));

        let out = data("notes", json!({}), json!({"x": 1})).await.unwrap();
        assert_eq!(out["main"], json!({"x": 1}));
    }
}
