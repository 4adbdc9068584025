/// AI nodes
///
/// Model-provider nodes, the agent node and task chains all funnel into one
/// injected `LanguageModel` client. API keys come from the run's
/// credentials. Provider failures degrade to `{error, text: ""}` data instead
/// of failing the run.

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::runtime::expression::to_display_string;

/// One completion call against a provider
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f64,
}

/// Language-model client collaborator
pub trait LanguageModel: Send + Sync {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>>;
}

/// Provider a node type talks to, and the model it defaults to
fn provider_for(call: &NodeCall<'_>) -> (String, &'static str) {
    let fixed = match call.node_type {
        "openai" => Some(("openai", "gpt-4o-mini")),
        "gpt-4-turbo" => Some(("openai", "gpt-4-turbo")),
        "gpt-3.5-turbo" => Some(("openai", "gpt-3.5-turbo")),
        "anthropic" => Some(("anthropic", "claude-3-5-sonnet-latest")),
        "claude-3-opus" => Some(("anthropic", "claude-3-opus-20240229")),
        "claude-3-sonnet" => Some(("anthropic", "claude-3-sonnet-20240229")),
        "google-gemini" => Some(("google", "gemini-1.5-flash")),
        "groq-llama" => Some(("groq", "llama-3.1-8b-instant")),
        "groq-gemma" => Some(("groq", "gemma2-9b-it")),
        _ => None,
    };
    if let Some((provider, model)) = fixed {
        return (provider.to_string(), model);
    }

    let provider = match call.string_or("provider", "openai").to_lowercase().as_str() {
        "anthropic" | "claude" => "anthropic",
        "google" | "gemini" | "google-gemini" => "google",
        "groq" | "groq-llama" | "groq-gemma" => "groq",
        _ => "openai",
    };
    let model = match provider {
        "anthropic" => "claude-3-5-sonnet-latest",
        "google" => "gemini-1.5-flash",
        "groq" => "llama-3.1-8b-instant",
        _ => "gpt-4o-mini",
    };
    (provider.to_string(), model)
}

/// Best text representation of an input payload
fn input_text(input: &Value) -> String {
    ["text", "message", "content", "response", "output"]
        .iter()
        .filter_map(|key| input.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| to_display_string(input))
}

fn list_property(call: &NodeCall<'_>, name: &str) -> Vec<String> {
    match call.property(name) {
        Some(Value::Array(items)) => items.iter().map(to_display_string).collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// System prompt and user prompt for a node
fn build_prompts(call: &NodeCall<'_>, inputs: &NodeInputs) -> (Option<String>, String) {
    let input = inputs.main();
    let user_prompt = call
        .str_property("prompt")
        .or_else(|| call.str_property("message"))
        .map(str::to_string)
        .unwrap_or_else(|| input_text(input));
    let custom_system = call
        .str_property("system_prompt")
        .or_else(|| call.str_property("systemMessage"))
        .map(str::to_string);

    let task = match call.node_type {
        "summarization-chain" => Some("Summarize the following text concisely.".to_string()),
        "information-extractor" => Some(format!(
            "Extract the following attributes from the text as a JSON object: {}. Respond with JSON only.",
            list_property(call, "attributes").join(", ")
        )),
        "text-classifier" => Some(format!(
            "Classify the text into exactly one of these categories: {}. Respond with the category name only.",
            list_property(call, "categories").join(", ")
        )),
        "sentiment-analysis" => Some(
            "Analyze the sentiment of the text. Respond with one word: positive, negative, or neutral.".to_string(),
        ),
        "question-answer-chain" => Some("Answer the question using only the provided context.".to_string()),
        _ => None,
    };

    let prompt = if call.node_type == "question-answer-chain" {
        let question = call.string_or("question", &user_prompt);
        let context = call
            .str_property("context")
            .map(str::to_string)
            .unwrap_or_else(|| input_text(input));
        format!("Context:\n{}\n\nQuestion: {}", context, question)
    } else {
        user_prompt
    };

    let system = match (task, custom_system) {
        (Some(task), Some(custom)) => Some(format!("{}\n\n{}", custom, task)),
        (task, custom) => task.or(custom),
    };
    (system, prompt)
}

/// Strip a ```json fence if the model wrapped its answer in one
fn parse_json_reply(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

fn degraded(message: String) -> Value {
    tracing::warn!("⚠️ AI node degraded: {}", message);
    json!({ "main": { "error": message, "text": "" } })
}

pub struct AiExecutor {
    model: Option<Arc<dyn LanguageModel>>,
}

impl AiExecutor {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }
}

impl NodeExecutor for AiExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let (provider, default_model) = provider_for(call);
            let model = call.string_or("model", default_model);

            let Some(client) = &self.model else {
                return Ok(degraded("No language model client configured".to_string()));
            };
            let key_name = format!("{}_api_key", provider);
            let Some(api_key) = ctx.credential(&key_name) else {
                return Ok(degraded(format!("Missing credential: {}", key_name)));
            };

            let (system, prompt) = build_prompts(call, inputs);
            let temperature = call
                .property("temperature")
                .and_then(Value::as_f64)
                .unwrap_or(0.7);

            tracing::info!("🤖 Calling {} model {} for node {}", provider, model, call.node_id);
            let request = CompletionRequest {
                provider: provider.clone(),
                model: model.clone(),
                api_key: api_key.to_string(),
                system,
                prompt,
                temperature,
            };

            let text = match client.complete(request).await {
                Ok(text) => text,
                Err(e) => return Ok(degraded(format!("{} request failed: {}", provider, e))),
            };

            let mut output = Map::new();
            output.insert("text".into(), json!(text));
            output.insert("response".into(), json!(text));
            output.insert("output".into(), json!(text));
            output.insert("provider".into(), json!(provider));
            output.insert("model".into(), json!(model));
            match call.node_type {
                "information-extractor" => {
                    output.insert("data".into(), parse_json_reply(&text).unwrap_or(Value::Null));
                }
                "text-classifier" => {
                    output.insert("category".into(), json!(text.trim()));
                }
                "sentiment-analysis" => {
                    output.insert("sentiment".into(), json!(text.trim().to_lowercase()));
                }
                _ => {}
            }

            Ok(json!({ "main": output }))
        })
    }
}

/// `LanguageModel` backed by the providers' HTTP APIs
pub struct HttpLanguageModel {
    client: reqwest::Client,
}

impl HttpLanguageModel {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    fn openai_compatible(&self, base_url: &str, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        self.client
            .post(format!("{}/chat/completions", base_url))
            .bearer_auth(&request.api_key)
            .json(&json!({
                "model": request.model,
                "messages": messages,
                "temperature": request.temperature,
            }))
    }

    async fn send(&self, request: CompletionRequest) -> Result<String> {
        let (builder, pointer) = match request.provider.as_str() {
            "anthropic" => (
                self.client
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", &request.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&json!({
                        "model": request.model,
                        "max_tokens": 1024,
                        "system": request.system.clone().unwrap_or_default(),
                        "messages": [{"role": "user", "content": request.prompt}],
                        "temperature": request.temperature,
                    })),
                "/content/0/text",
            ),
            "google" => (
                self.client
                    .post(format!(
                        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                        request.model
                    ))
                    .query(&[("key", request.api_key.as_str())])
                    .json(&json!({
                        "systemInstruction": request.system.as_ref().map(|s| json!({"parts": [{"text": s}]})),
                        "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
                        "generationConfig": {"temperature": request.temperature},
                    })),
                "/candidates/0/content/parts/0/text",
            ),
            "groq" => (
                self.openai_compatible("https://api.groq.com/openai/v1", &request),
                "/choices/0/message/content",
            ),
            _ => (
                self.openai_compatible("https://api.openai.com/v1", &request),
                "/choices/0/message/content",
            ),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("status {}: {}", status, body));
        }

        body.pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("unexpected response shape: {}", body))
    }
}

impl LanguageModel for HttpLanguageModel {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(self.send(request))
    }
}
