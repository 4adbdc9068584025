/// Terminal output nodes: `respond-to-chat` and `readme-viewer`

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::runtime::{expression::to_display_string, nodes::flow::is_truthy};

const TOP_LEVEL_CONTENT_KEYS: [&str; 5] = ["text", "content", "response", "message", "output"];
const NESTED_CONTENT_KEYS: [&str; 4] = ["text", "content", "response", "message"];

pub struct OutputExecutor;

impl NodeExecutor for OutputExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match call.node_type {
                "respond-to-chat" => Ok(respond_to_chat(call, inputs, ctx)),
                "readme-viewer" => Ok(readme_viewer(call, inputs)),
                other => Err(call.fail(format!("Unknown output node type: {}", other))),
            }
        })
    }
}

fn respond_to_chat(call: &NodeCall<'_>, inputs: &NodeInputs, ctx: &RuntimeContext<'_>) -> Value {
    let message = match call.property("message").filter(|message| is_truthy(message)) {
        Some(message) => to_display_string(message),
        None => match inputs.main.as_ref().filter(|input| is_truthy(input)) {
            Some(Value::Object(map)) => ["text", "message"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find(|value| is_truthy(value))
                .map(to_display_string)
                .unwrap_or_else(|| to_display_string(&Value::Object(map.clone()))),
            Some(other) => to_display_string(other),
            None => String::new(),
        },
    };

    tracing::info!("💬 Responding to chat with message: {}", message.chars().take(100).collect::<String>());
    ctx.set_chat_response(message.clone());

    json!({
        "main": {
            "response": message,
            "text": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "type": "chat_response",
        }
    })
}

/// First truthy value among `keys`, as display text
fn first_content(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| is_truthy(value))
        .map(to_display_string)
}

/// Best displayable content of an input, in strict priority order:
/// top-level content keys, then one level of nesting (or the longest plain
/// string value), then the pretty-printed mapping. Empty when nothing fits.
fn extract_content(input: &Value) -> String {
    let map = match input {
        Value::Object(map) => map,
        other => return to_display_string(other),
    };

    if let Some(content) = first_content(map, &TOP_LEVEL_CONTENT_KEYS) {
        return content;
    }

    let mut content = String::new();
    for value in map.values() {
        match value {
            Value::Object(nested) => match first_content(nested, &NESTED_CONTENT_KEYS) {
                Some(found) => {
                    content = found;
                    break;
                }
                // a nested mapping without content discards earlier string candidates
                None => content.clear(),
            },
            Value::String(s) if s.chars().count() > content.chars().count() => content = s.clone(),
            _ => {}
        }
    }

    if content.is_empty() && !map.is_empty() {
        content = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    }
    content
}

fn readme_viewer(call: &NodeCall<'_>, inputs: &NodeInputs) -> Value {
    let input = inputs.main.clone().unwrap_or_else(|| json!({}));
    let mut content = extract_content(&input);

    if content.trim().is_empty() {
        content = call
            .str_property("content")
            .filter(|configured| !configured.trim().is_empty())
            .unwrap_or("work")
            .to_string();
    }

    let title = call.string_or("title", "Content Viewer");
    tracing::info!("📖 Displaying content in README viewer: {}", title);

    json!({
        "main": {
            "title": title,
            "content": content,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "type": "readme_viewer",
            "formatted": true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::test_support::{main_input, run, Fixture};

    async fn viewer(props: Value, input: Value) -> String {
        let out = run(&OutputExecutor, "readme-viewer", props, &main_input(input), &Fixture::new())
            .await
            .unwrap();
        out["main"]["content"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_readme_viewer_fallback_chain() {
        assert_eq!(viewer(json!({"content": ""}), json!({})).await, "work");
        assert_eq!(viewer(json!({"content": "configured"}), json!({})).await, "configured");
        assert_eq!(viewer(json!({"content": "configured"}), json!({"text": "hi"})).await, "hi");
        assert_eq!(viewer(json!({}), json!({"output": "out", "message": "msg"})).await, "msg");
    }

    #[tokio::test]
    async fn test_readme_viewer_nested_and_longest_string() {
        assert_eq!(viewer(json!({}), json!({"agent": {"response": "nested"}})).await, "nested");
        assert_eq!(viewer(json!({}), json!({"a": "short", "b": "much longer"})).await, "much longer");
        assert_eq!(viewer(json!({}), json!({"count": 3})).await, "{\n  \"count\": 3\n}");
        assert_eq!(viewer(json!({}), json!("plain")).await, "plain");
    }

    #[tokio::test]
    async fn test_readme_viewer_nested_without_content_resets_candidate() {
        assert_eq!(
            viewer(json!({}), json!({"summary": "a long summary", "meta": {"x": 1}})).await,
            "{\n  \"summary\": \"a long summary\",\n  \"meta\": {\n    \"x\": 1\n  }\n}"
        );
        assert_eq!(
            viewer(json!({}), json!({"meta": {"x": 1}, "summary": "a long summary"})).await,
            "a long summary"
        );
    }

    #[tokio::test]
    async fn test_respond_to_chat_sets_side_channel() {
        let fixture = Fixture::new();
        let properties = serde_json::Map::new();
        let call = NodeCall::new("out", "respond-to-chat", &properties);
        let ctx = fixture.context();
        let inputs = main_input(json!({"text": "All done"}));

        let out = OutputExecutor.execute(&call, &inputs, &ctx).await.unwrap();
        assert_eq!(out["main"]["response"], "All done");
        assert_eq!(out["main"]["type"], "chat_response");
        assert_eq!(ctx.take_chat_response().as_deref(), Some("All done"));
    }

    #[tokio::test]
    async fn test_respond_to_chat_prefers_property() {
        let out = run(
            &OutputExecutor,
            "respond-to-chat",
            json!({"message": "Configured"}),
            &main_input(json!({"text": "ignored"})),
            &Fixture::new(),
        )
        .await
        .unwrap();
        assert_eq!(out["main"]["text"], "Configured");
    }

    #[tokio::test]
    async fn test_respond_to_chat_accepts_non_string_message() {
        let out = run(
            &OutputExecutor,
            "respond-to-chat",
            json!({"message": 42}),
            &main_input(json!({"text": "ignored"})),
            &Fixture::new(),
        )
        .await
        .unwrap();
        assert_eq!(out["main"]["response"], "42");
    }
}
