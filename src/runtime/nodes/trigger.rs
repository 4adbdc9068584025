/// Trigger nodes: seed a run from the trigger payload
///
/// Triggers have no upstream edges; they read `trigger_data` from the runtime
/// context and emit a normalized `main` payload.

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::runtime::expression::to_display_string;

pub struct TriggerExecutor;

impl NodeExecutor for TriggerExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        _inputs: &'a NodeInputs,
        ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match call.node_type {
                "when-chat-received" => Ok(chat_trigger(call, ctx.trigger_data)),
                "webhook" => Ok(webhook_trigger(call, ctx.trigger_data)),
                "schedule" => Ok(schedule_trigger(call, ctx.trigger_data)),
                "manual-trigger" => Ok(manual_trigger(call, ctx.trigger_data)),
                other => Err(call.fail(format!("Unknown trigger node type: {}", other))),
            }
        })
    }
}

fn text_field<'v>(data: &'v Value, key: &str) -> Option<&'v str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn chat_trigger(call: &NodeCall<'_>, trigger: &Value) -> Value {
    let channel = call.string_or("channel", "");
    let message = text_field(trigger, "message").unwrap_or_default();
    let user = text_field(trigger, "user").unwrap_or("anonymous");
    let timestamp = text_field(trigger, "timestamp").unwrap_or_default();

    tracing::info!("💬 Chat trigger activated from channel: {}", channel);

    json!({
        "main": {
            "message": message,
            "user": user,
            "channel": channel,
            "timestamp": timestamp,
            "text": message,
        }
    })
}

/// Empty means missing, null, or an empty string/object/array
fn is_empty_payload(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn webhook_trigger(call: &NodeCall<'_>, trigger: &Value) -> Value {
    let path = call.string_or("path", "/webhook");
    let methods = call.property("method").cloned().unwrap_or_else(|| json!(["POST"]));

    let mut webhook_data = match trigger {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    tracing::info!("🪝 Webhook trigger activated on path: {}", path);

    if is_empty_payload(webhook_data.get("body")) {
        match call.str_property("test_json").map(str::trim).filter(|s| !s.is_empty()) {
            Some(test_json) => match serde_json::from_str::<Value>(test_json) {
                Ok(parsed) => {
                    tracing::debug!("🧪 Using test_json from properties as webhook body");
                    webhook_data.insert("body".to_string(), parsed);
                }
                Err(e) => tracing::warn!("⚠️ Failed to parse test_json: {}", e),
            },
            None => tracing::debug!("📭 Webhook body is empty and no test_json is configured"),
        }
    }

    let body = webhook_data.get("body").cloned().unwrap_or_else(|| json!({}));
    let data = Value::Object(webhook_data.clone());

    let mut output = Map::new();
    output.insert("path".into(), json!(path));
    output.insert("methods".into(), methods);
    output.insert("data".into(), data.clone());
    output.insert("body".into(), body.clone());
    output.insert("headers".into(), webhook_data.get("headers").cloned().unwrap_or_else(|| json!({})));
    output.insert(
        "query_params".into(),
        webhook_data.get("query_params").cloned().unwrap_or_else(|| json!({})),
    );
    output.insert("method".into(), webhook_data.get("method").cloned().unwrap_or_else(|| json!("POST")));
    output.insert("timestamp".into(), webhook_data.get("timestamp").cloned().unwrap_or(Value::Null));
    output.insert("text".into(), json!(data.to_string()));

    // body fields are flattened on top so `json.<field>` works downstream
    if let Value::Object(fields) = body {
        output.extend(fields);
    }

    json!({ "main": output })
}

fn schedule_trigger(call: &NodeCall<'_>, trigger: &Value) -> Value {
    let interval = call.string_or("interval", "hours");
    let value = call.property("value").cloned().unwrap_or_else(|| json!(1));

    tracing::info!("⏰ Schedule trigger activated (every {} {})", to_display_string(&value), interval);

    json!({
        "main": {
            "interval": interval,
            "value": value,
            "triggered_at": text_field(trigger, "timestamp").unwrap_or_default(),
            "text": format!("Scheduled execution every {} {}", to_display_string(&value), interval),
        }
    })
}

fn manual_trigger(call: &NodeCall<'_>, trigger: &Value) -> Value {
    let message = call
        .str_property("message")
        .or_else(|| text_field(trigger, "message"))
        .or_else(|| text_field(trigger, "text"))
        .unwrap_or("Manual execution started");

    tracing::info!("👆 Manual trigger activated: '{}'", message);

    json!({
        "main": {
            "triggered_manually": true,
            "message": message,
            "text": message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::test_support::{run, Fixture};

    #[tokio::test]
    async fn test_chat_trigger_reads_trigger_payload() {
        let mut fixture = Fixture::new();
        fixture.trigger_data = json!({"message": "hi there", "user": "ada"});

        let out = run(&TriggerExecutor, "when-chat-received", json!({"channel": "web"}), &NodeInputs::default(), &fixture)
            .await
            .unwrap();
        assert_eq!(out["main"]["message"], "hi there");
        assert_eq!(out["main"]["text"], "hi there");
        assert_eq!(out["main"]["user"], "ada");
        assert_eq!(out["main"]["channel"], "web");
    }

    #[tokio::test]
    async fn test_webhook_flattens_body_fields() {
        let mut fixture = Fixture::new();
        fixture.trigger_data = json!({
            "body": {"name": "Ada", "age": 36},
            "headers": {"x-id": "1"},
            "method": "POST"
        });

        let out = run(&TriggerExecutor, "webhook", json!({"path": "/hook"}), &NodeInputs::default(), &fixture)
            .await
            .unwrap();
        let main = &out["main"];
        assert_eq!(main["path"], "/hook");
        assert_eq!(main["methods"], json!(["POST"]));
        assert_eq!(main["body"]["name"], "Ada");
        assert_eq!(main["name"], "Ada");
        assert_eq!(main["age"], 36);
        assert_eq!(main["headers"]["x-id"], "1");
        assert_eq!(main["query_params"], json!({}));
    }

    #[tokio::test]
    async fn test_webhook_falls_back_to_test_json() {
        let fixture = Fixture::new();
        let out = run(
            &TriggerExecutor,
            "webhook",
            json!({"test_json": "{\"order\": 42}"}),
            &NodeInputs::default(),
            &fixture,
        )
        .await
        .unwrap();
        assert_eq!(out["main"]["body"], json!({"order": 42}));
        assert_eq!(out["main"]["data"]["body"], json!({"order": 42}));
        assert_eq!(out["main"]["order"], 42);
    }

    #[tokio::test]
    async fn test_schedule_and_manual_triggers() {
        let fixture = Fixture::new();
        let out = run(&TriggerExecutor, "schedule", json!({"interval": "minutes", "value": 5}), &NodeInputs::default(), &fixture)
            .await
            .unwrap();
        assert_eq!(out["main"]["text"], "Scheduled execution every 5 minutes");

        let out = run(&TriggerExecutor, "manual-trigger", json!({}), &NodeInputs::default(), &fixture)
            .await
            .unwrap();
        assert_eq!(out["main"]["message"], "Manual execution started");
        assert_eq!(out["main"]["triggered_manually"], true);
    }
}
