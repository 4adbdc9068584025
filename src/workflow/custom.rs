/// Sample dynamic nodes and tools registered at server start

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Value};

use crate::workflow::{
    registry::{ArgAnnotation, ArgSpec, DynamicInvocation, DynamicNode, NodeParameter, NodeRegistry, ParameterType},
    tools::{DynamicTool, ToolRegistry},
};

/// Register every sample node and tool
pub fn register_samples(nodes: &NodeRegistry, tools: &ToolRegistry) -> Result<()> {
    nodes.register(text_transform_node()?);
    nodes.register(math_calculator_node()?);
    nodes.register(json_processor_node()?);

    tools.register(timestamp_converter_tool());
    tools.register(text_analyzer_tool());
    Ok(())
}

fn text_transform_node() -> Result<DynamicNode> {
    DynamicNode::builder("custom-text-transform")
        .name("Text Transform")
        .description("Transform text with various operations")
        .category("Custom")
        .icon("🔤")
        .color("#8b5cf6")
        .parameter(
            NodeParameter::new("operation", ParameterType::Select)
                .label("Operation")
                .required()
                .options(["uppercase", "lowercase", "title", "reverse"])
                .default_value("uppercase"),
        )
        .parameter(
            NodeParameter::new("input_text", ParameterType::Expression)
                .label("Input Text")
                .placeholder("${{ $json.text }}")
                .description("Text to transform (supports expressions)"),
        )
        .sync_handler(transform_text)
        .build()
}

fn transform_text(invocation: DynamicInvocation) -> Result<Value> {
    let text = invocation
        .param_str("input_text")
        .filter(|text| !text.is_empty())
        .or_else(|| invocation.main_input().get("text").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    if text.is_empty() {
        return Ok(json!({"main": {"error": "No text provided"}}));
    }

    let operation = invocation.param_str("operation").unwrap_or("uppercase");
    let result = match operation {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        "title" => title_words(&text),
        "reverse" => text.chars().rev().collect(),
        _ => text.clone(),
    };

    Ok(json!({"main": {"text": result, "original": text, "operation": operation}}))
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest
fn title_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alphabetic = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_alphabetic {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alphabetic = true;
        } else {
            out.push(c);
            previous_alphabetic = false;
        }
    }
    out
}

fn math_calculator_node() -> Result<DynamicNode> {
    DynamicNode::builder("custom-math-calculator")
        .name("Math Calculator")
        .description("Perform mathematical calculations")
        .category("Custom")
        .icon("🔢")
        .color("#10b981")
        .parameter(
            NodeParameter::new("operation", ParameterType::Select)
                .label("Operation")
                .required()
                .options(["add", "subtract", "multiply", "divide", "power"])
                .default_value("add"),
        )
        .parameter(
            NodeParameter::new("num1", ParameterType::Expression)
                .label("First Number")
                .required()
                .placeholder("${{ $json.value1 }}"),
        )
        .parameter(
            NodeParameter::new("num2", ParameterType::Expression)
                .label("Second Number")
                .required()
                .placeholder("${{ $json.value2 }}"),
        )
        .sync_handler(calculate)
        .build()
}

fn parse_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("could not convert {} to float", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("could not convert string to float: '{}'", s)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(format!("float() argument must be a string or a number, not {}", other)),
    }
}

fn calculate(invocation: DynamicInvocation) -> Result<Value> {
    let (num1, num2) = match (parse_number(invocation.param("num1")), parse_number(invocation.param("num2"))) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return Ok(json!({"main": {"error": format!("Invalid number: {}", e)}})),
    };

    let operation = invocation.param_str("operation").unwrap_or("add");
    let result = match operation {
        "add" => num1 + num2,
        "subtract" => num1 - num2,
        "multiply" => num1 * num2,
        "divide" if num2 == 0.0 => return Ok(json!({"main": {"error": "Division by zero"}})),
        "divide" => num1 / num2,
        "power" => num1.powf(num2),
        _ => 0.0,
    };

    Ok(json!({"main": {"result": result, "num1": num1, "num2": num2, "operation": operation}}))
}

fn json_processor_node() -> Result<DynamicNode> {
    DynamicNode::builder("custom-json-processor")
        .name("JSON Processor")
        .description("Process and transform JSON data")
        .category("Custom")
        .icon("📦")
        .color("#f59e0b")
        .parameter(
            NodeParameter::new("json_path", ParameterType::Text)
                .label("JSON Path")
                .placeholder("data.items.0.value")
                .description("Path to extract from JSON (dot notation)"),
        )
        .parameter(
            NodeParameter::new("filter_key", ParameterType::Text)
                .label("Filter Key")
                .placeholder("status"),
        )
        .parameter(
            NodeParameter::new("filter_value", ParameterType::Text)
                .label("Filter Value")
                .placeholder("active"),
        )
        .sync_handler(process_json)
        .build()
}

/// Dot-path walk where any miss yields an empty mapping
fn walk_path(data: &Value, path: &str) -> Value {
    let mut current = data.clone();
    for part in path.split('.') {
        current = match &current {
            Value::Object(map) => map.get(part).cloned().unwrap_or_else(|| json!({})),
            Value::Array(items) => part
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index).cloned())
                .unwrap_or_else(|| json!({})),
            _ => current,
        };
    }
    current
}

fn process_json(invocation: DynamicInvocation) -> Result<Value> {
    let input = match invocation.main_input() {
        Value::Null => json!({}),
        other => other.clone(),
    };

    let mut data = match invocation.param_str("json_path").filter(|path| !path.is_empty()) {
        Some(path) => walk_path(&input, path),
        None => input.clone(),
    };

    let filter_key = invocation.param_str("filter_key").unwrap_or_default();
    let filter_value = invocation.param_str("filter_value").unwrap_or_default();
    if !filter_key.is_empty() && !filter_value.is_empty() {
        data = match data {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .filter(|item| item.get(filter_key).and_then(Value::as_str) == Some(filter_value))
                    .collect(),
            ),
            Value::Object(map) if map.get(filter_key).and_then(Value::as_str) == Some(filter_value) => {
                Value::Object(map)
            }
            _ => json!({}),
        };
    }

    Ok(json!({
        "main": {
            "original_size": input.to_string().chars().count(),
            "result_size": data.to_string().chars().count(),
            "data": data,
        }
    }))
}

fn timestamp_converter_tool() -> DynamicTool {
    DynamicTool::new(
        "timestamp-converter",
        "timestamp_converter",
        "Convert between timestamps and human-readable dates",
        &[ArgSpec::new("timestamp", ArgAnnotation::String)],
        |args: Value| async move {
            let timestamp = args.get("timestamp").and_then(Value::as_str).unwrap_or_default();
            Ok(Value::String(convert_timestamp(timestamp)))
        },
    )
}

fn convert_timestamp(timestamp: &str) -> String {
    let parsed = if !timestamp.is_empty() && timestamp.chars().all(|c| c.is_ascii_digit()) {
        timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| format!("timestamp out of range: {}", timestamp))
    } else {
        DateTime::parse_from_rfc3339(timestamp)
            .map(|dt| dt.naive_local())
            .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S"))
            .map_err(|e| format!("Invalid isoformat string '{}': {}", timestamp, e))
    };

    match parsed {
        Ok(dt) => format!("Converted timestamp: {}", dt.format("%Y-%m-%d %H:%M:%S")),
        Err(e) => format!("Error converting timestamp: {}", e),
    }
}

fn text_analyzer_tool() -> DynamicTool {
    DynamicTool::new(
        "text-analyzer",
        "text_analyzer",
        "Analyze text and provide statistics",
        &[ArgSpec::new("text", ArgAnnotation::String)],
        |args: Value| async move {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(analyze_text(text))
        },
    )
}

fn analyze_text(text: &str) -> Value {
    let words: Vec<&str> = text.split_whitespace().collect();
    let average_word_length = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|word| word.chars().count()).sum::<usize>() as f64 / words.len() as f64
    };

    json!({
        "characters": text.chars().count(),
        "words": words.len(),
        "lines": text.matches('\n').count() + 1,
        "average_word_length": average_word_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn invocation(main: Value, params: Value) -> DynamicInvocation {
        DynamicInvocation {
            inputs: json!({"main": main}),
            context: json!({}),
            params: match params {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    #[test]
    fn test_text_transform_operations() {
        let out = transform_text(invocation(json!({"text": "hello world"}), json!({"operation": "title"}))).unwrap();
        assert_eq!(out["main"]["text"], "Hello World");

        let out = transform_text(invocation(json!({}), json!({"operation": "reverse", "input_text": "abc"}))).unwrap();
        assert_eq!(out["main"]["text"], "cba");

        let out = transform_text(invocation(json!({}), json!({"operation": "uppercase"}))).unwrap();
        assert_eq!(out["main"]["error"], "No text provided");
    }

    #[test]
    fn test_math_calculator() {
        let out = calculate(invocation(json!({}), json!({"operation": "power", "num1": "2", "num2": 10}))).unwrap();
        assert_eq!(out["main"]["result"], 1024.0);

        let out = calculate(invocation(json!({}), json!({"operation": "divide", "num1": 1, "num2": 0}))).unwrap();
        assert_eq!(out, json!({"main": {"error": "Division by zero"}}));

        let out = calculate(invocation(json!({}), json!({"operation": "add", "num1": "x", "num2": 1}))).unwrap();
        assert!(out["main"]["error"].as_str().unwrap().starts_with("Invalid number"));
    }

    #[test]
    fn test_json_processor_path_and_filter() {
        let data = json!({"data": {"items": [{"status": "active", "v": 1}, {"status": "off", "v": 2}]}});
        let out = process_json(invocation(
            data.clone(),
            json!({"json_path": "data.items", "filter_key": "status", "filter_value": "active"}),
        ))
        .unwrap();
        assert_eq!(out["main"]["data"], json!([{"status": "active", "v": 1}]));

        let out = process_json(invocation(data, json!({"json_path": "data.items.1.v"}))).unwrap();
        assert_eq!(out["main"]["data"], 2);
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(convert_timestamp("0"), "Converted timestamp: 1970-01-01 00:00:00");
        assert_eq!(
            convert_timestamp("2024-03-01T12:30:00"),
            "Converted timestamp: 2024-03-01 12:30:00"
        );
        assert!(convert_timestamp("yesterday").starts_with("Error converting timestamp"));
    }

    #[test]
    fn test_text_statistics() {
        let stats = analyze_text("one two\nthree");
        assert_eq!(stats["words"], 3);
        assert_eq!(stats["lines"], 2);
        assert_eq!(stats["characters"], 13);
    }

    #[tokio::test]
    async fn test_samples_register() {
        let nodes = NodeRegistry::new();
        let tools = ToolRegistry::new();
        register_samples(&nodes, &tools).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.contains("custom-math-calculator"));

        let stats = tools.invoke("text-analyzer", json!({"text": "a b"})).await.unwrap();
        assert_eq!(stats["words"], 2);
    }
}
