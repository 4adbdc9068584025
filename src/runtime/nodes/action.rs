/// Action nodes that call external APIs

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, time::Duration};

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};

pub struct ActionExecutor {
    client: reqwest::Client,
}

impl ActionExecutor {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl NodeExecutor for ActionExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        _ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match call.node_type {
                "http-request" => self.http_request(call, inputs).await,
                "google-sheets" => Ok(google_sheets(call)),
                other => Err(call.fail(format!("Unknown action node type: {}", other))),
            }
        })
    }
}

/// Headers given either as an object or as a JSON object string
fn header_map(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) if !raw.trim().is_empty() => match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!("⚠️ Ignoring malformed headers property: {}", raw);
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

impl ActionExecutor {
    /// Make an HTTP request; the `main` input is the default body for POST/PUT/PATCH
    async fn http_request(&self, call: &NodeCall<'_>, inputs: &NodeInputs) -> Result<Value> {
        let url = call
            .str_property("url")
            .ok_or_else(|| call.fail("HTTP request missing 'url' parameter"))?;
        let method = call.string_or("method", "GET").to_uppercase();
        let headers = header_map(call.property("headers"));

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request_builder = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            _ => return Err(call.fail(format!("Unsupported HTTP method: {}", method))),
        };

        for (key, value) in &headers {
            if let Some(header_value) = value.as_str() {
                request_builder = request_builder.header(key.as_str(), header_value);
            }
        }

        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            let body = call.property("body").or(inputs.main.as_ref());
            match body {
                Some(Value::String(text)) => {
                    request_builder = request_builder
                        .header("Content-Type", "text/plain")
                        .body(text.clone());
                }
                Some(body) if body.is_object() || body.is_array() => {
                    request_builder = request_builder.json(body);
                }
                _ => {}
            }
        }

        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("❌ HTTP request failed: {} {} - {}", method, url, e);
                return Ok(json!({
                    "main": { "error": format!("HTTP request failed: {}", e), "success": false }
                }));
            }
        };

        let status = response.status();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let response_text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Ok(json!({
                    "main": { "error": format!("Failed to read response body: {}", e), "success": false }
                }))
            }
        };
        let data = serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        Ok(json!({
            "main": {
                "status": status.as_u16(),
                "headers": headers_map,
                "data": data,
                "success": status.is_success(),
            }
        }))
    }
}

fn google_sheets(call: &NodeCall<'_>) -> Value {
    let operation = call.string_or("operation", "read");
    tracing::warn!("⚠️ google-sheets {} requested but no Sheets integration is configured", operation);
    json!({
        "main": {
            "error": "Google Sheets integration is not configured",
            "operation": operation,
            "success": false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::test_support::{main_input, run, Fixture};

    fn executor() -> ActionExecutor {
        ActionExecutor::new(2).unwrap()
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let err = run(&executor(), "http-request", json!({}), &main_input(json!({})), &Fixture::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_an_error() {
        let props = json!({"url": "http://127.0.0.1:9/", "method": "TRACE"});
        let err = run(&executor(), "http-request", props, &main_input(json!({})), &Fixture::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported HTTP method: TRACE");
    }

    #[tokio::test]
    async fn test_transport_failure_degrades_to_data() {
        // port 9 (discard) is closed on test machines
        let props = json!({"url": "http://127.0.0.1:9/", "method": "POST"});
        let out = run(&executor(), "http-request", props, &main_input(json!({"a": 1})), &Fixture::new())
            .await
            .unwrap();
        assert_eq!(out["main"]["success"], false);
        assert!(out["main"]["error"].as_str().unwrap().starts_with("HTTP request failed"));
    }

    #[tokio::test]
    async fn test_google_sheets_degrades() {
        let out = run(&executor(), "google-sheets", json!({}), &NodeInputs::default(), &Fixture::new())
            .await
            .unwrap();
        assert_eq!(out["main"]["success"], false);
    }

    #[test]
    fn test_header_map_accepts_json_string() {
        let headers = header_map(Some(&json!("{\"x-token\": \"abc\"}")));
        assert_eq!(headers["x-token"], "abc");
        assert!(header_map(Some(&json!("not json"))).is_empty());
    }
}
