/// `${{ ... }}` expression evaluator
///
/// Resolves template expressions in node properties against the current
/// node input (`json`), prior node outputs (`$json.<nodeId>`), and workflow
/// variables (`$vars`). Arithmetic uses a small recursive-descent parser with
/// the usual precedence: `* /` bind tighter than `+ -`, parentheses group,
/// and division by zero yields 0.
///
/// A failing block never aborts the template: it is logged and its literal
/// text stays in place.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

use crate::workflow::types::NodeResults;

static EXPRESSION_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{(.+?)\}\}").expect("expression block pattern"));

/// Marker that identifies an expression-bearing string
pub const EXPRESSION_MARKER: &str = "${{";

#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected token in expression: {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

/// Data an expression can see
#[derive(Debug, Clone, Copy)]
pub struct EvalScope<'a> {
    /// Outputs of every node executed so far in this run
    pub node_results: &'a NodeResults,
    /// The current node's resolved `main` input
    pub json: &'a Value,
    /// Workflow-scoped variables (execution id, workflow id/name)
    pub vars: &'a Value,
}

impl<'a> EvalScope<'a> {
    pub fn new(node_results: &'a NodeResults, json: &'a Value, vars: &'a Value) -> Self {
        Self { node_results, json, vars }
    }

    /// Evaluate a property value; non-strings pass through unchanged
    pub fn evaluate(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => self.evaluate_str(text),
            other => other.clone(),
        }
    }

    /// Evaluate a template string
    ///
    /// A template that is exactly one block returns that block's value as-is
    /// (absent values become null). Otherwise each block is substituted by its
    /// string form, and a result that looks like a JSON object/array is parsed.
    pub fn evaluate_str(&self, template: &str) -> Value {
        if !template.contains(EXPRESSION_MARKER) {
            return Value::String(template.to_string());
        }

        let blocks: Vec<_> = EXPRESSION_BLOCK.captures_iter(template).collect();
        if blocks.is_empty() {
            return Value::String(template.to_string());
        }

        if blocks.len() == 1 {
            if let Some(whole) = blocks[0].get(0) {
                if whole.as_str() == template.trim() {
                    let expr = blocks[0].get(1).map_or("", |m| m.as_str());
                    return match self.evaluate_block(expr) {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!("⚠️ Failed to evaluate expression '{}': {}", expr.trim(), e);
                            Value::String(template.to_string())
                        }
                    };
                }
            }
        }

        let substituted = EXPRESSION_BLOCK.replace_all(template, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str());
            match self.evaluate_block(expr) {
                Ok(value) => to_display_string(&value),
                Err(e) => {
                    tracing::warn!("⚠️ Failed to evaluate expression '{}': {}", expr.trim(), e);
                    caps[0].to_string()
                }
            }
        });

        if substituted.starts_with('{') || substituted.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(&substituted) {
                return parsed;
            }
        }
        Value::String(substituted.into_owned())
    }

    /// Resolve every `${{`-bearing string in a property bag, returning a new bag
    pub fn resolve_properties(&self, properties: &Map<String, Value>) -> Map<String, Value> {
        properties
            .iter()
            .map(|(key, value)| {
                let resolved = match value {
                    Value::String(text) if text.contains(EXPRESSION_MARKER) => {
                        let resolved = self.evaluate_str(text);
                        tracing::debug!("🧮 Resolved property '{}': {} -> {}", key, text, resolved);
                        resolved
                    }
                    other => other.clone(),
                };
                (key.clone(), resolved)
            })
            .collect()
    }

    /// Evaluate the inside of one `${{ }}` block
    pub fn evaluate_block(&self, expr: &str) -> Result<Value, ExpressionError> {
        let expr = expr.trim();
        let tokens = tokenize(expr)?;

        match tokens.as_slice() {
            [] => Ok(Value::Null),
            [Token::Path(path)] => Ok(self.resolve_reference(path)),
            [Token::Number(n)] => Ok(number(*n)),
            [Token::Str(s)] => Ok(Value::String(s.clone())),
            _ => {
                let mut parser = Parser { tokens: &tokens, pos: 0, scope: self };
                let result = parser.expression()?;
                if parser.pos < tokens.len() {
                    return Err(ExpressionError::UnexpectedToken(format!("{:?}", tokens[parser.pos])));
                }
                Ok(number(result))
            }
        }
    }

    /// Resolve a reference such as `json.user.name`, `$json.node1.text`, `$vars.workflow.id`
    fn resolve_reference(&self, reference: &str) -> Value {
        if let Some(rest) = strip_root(reference, "$vars") {
            return lookup_path(self.vars, rest).unwrap_or(Value::Null);
        }

        if let Some(rest) = strip_root(reference, "$json") {
            let (head, tail) = split_head(rest);
            if let Some(output) = self.node_results.get(head) {
                let data = output.main();
                return lookup_path(data, tail).unwrap_or(Value::Null);
            }
            return lookup_path(self.json, rest).unwrap_or(Value::Null);
        }

        if let Some(rest) = strip_root(reference, "json") {
            return lookup_path(self.json, rest).unwrap_or(Value::Null);
        }

        lookup_path(self.json, reference).unwrap_or(Value::Null)
    }
}

/// Strip `root` plus an optional following `.`; `None` when `reference` does not start with `root`
fn strip_root<'r>(reference: &'r str, root: &str) -> Option<&'r str> {
    let rest = reference.strip_prefix(root)?;
    if rest.is_empty() {
        Some(rest)
    } else if let Some(tail) = rest.strip_prefix('.') {
        Some(tail)
    } else if rest.starts_with('[') {
        Some(rest)
    } else {
        None
    }
}

/// "node1.text.value" -> ("node1", "text.value")
fn split_head(path: &str) -> (&str, &str) {
    match path.find(['.', '[']) {
        Some(idx) => {
            let tail = &path[idx..];
            (&path[..idx], tail.strip_prefix('.').unwrap_or(tail))
        }
        None => (path, ""),
    }
}

/// Walk a dot/bracket path through a JSON structure
///
/// A missing key, an out-of-range index, or a segment applied to a scalar
/// stops the walk and yields `None`.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for raw in path.split(['.', '[', ']']) {
        let segment = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }
    Some(current.clone())
}

/// String form used when substituting a value into a template
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric coercion for arithmetic operands; non-numeric values count as 0
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Path(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Hyphens only join inside the node-id segment of `$json.<id>`; elsewhere `-` is subtraction
fn in_node_id_segment(token: &[char]) -> bool {
    let text: String = token.iter().collect();
    text.strip_prefix("$json.")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains(['.', '[']))
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(ExpressionError::UnterminatedString);
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if is_ident(c) => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i];
                    if is_ident(ch) || ch == '.' {
                        i += 1;
                    } else if ch == '-' && in_node_id_segment(&chars[start..i]) && chars.get(i + 1).is_some_and(|n| is_ident(*n)) {
                        i += 1;
                    } else if ch == '[' {
                        while i < chars.len() && chars[i] != ']' {
                            i += 1;
                        }
                        if i >= chars.len() {
                            return Err(ExpressionError::UnexpectedEnd);
                        }
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Path(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser<'t, 's> {
    tokens: &'t [Token],
    pos: usize,
    scope: &'s EvalScope<'s>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expression(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    acc *= self.unary()?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let divisor = self.unary()?;
                    acc = if divisor == 0.0 { 0.0 } else { acc / divisor };
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<f64, ExpressionError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, ExpressionError> {
        let scope = self.scope;
        match self.next().cloned() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Str(s)) => Ok(to_number(&Value::String(s))),
            Some(Token::Path(path)) => Ok(to_number(&scope.resolve_reference(&path))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken(format!("{:?}", other))),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ExpressionError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::NodeOutput;
    use serde_json::json;
    use std::collections::HashMap;

    fn eval(template: &str, json: Value) -> Value {
        let results = HashMap::new();
        let vars = json!({"execution": {"id": "exec-1", "mode": "test"}, "workflow": {"id": "wf-1", "name": "Demo"}});
        EvalScope::new(&results, &json, &vars).evaluate_str(template)
    }

    #[test]
    fn test_plain_strings_pass_through() {
        assert_eq!(eval("hello", json!({})), json!("hello"));
        let results = HashMap::new();
        let scope = EvalScope::new(&results, &Value::Null, &Value::Null);
        assert_eq!(scope.evaluate(&json!(42)), json!(42));
    }

    #[test]
    fn test_json_path_lookup() {
        let input = json!({"user": {"name": "Ada"}});
        assert_eq!(eval("${{ json.user.name }}", input.clone()), json!("Ada"));
        assert_eq!(eval("${{ $json.user.name }}", input), json!("Ada"));
    }

    #[test]
    fn test_missing_path_is_null_not_error() {
        assert_eq!(eval("${{ json.missing }}", json!({"user": 1})), Value::Null);
        assert_eq!(eval("Hi ${{ json.missing }}!", json!({})), json!("Hi !"));
    }

    #[test]
    fn test_bracket_paths_and_indices() {
        let input = json!({"items": [{"id": 7}, {"id": 8}], "odd key": true});
        assert_eq!(eval("${{ json.items[1].id }}", input.clone()), json!(8));
        assert_eq!(eval("${{ json['odd key'] }}", input.clone()), json!(true));
        assert_eq!(eval("${{ json.items[5].id }}", input), Value::Null);
    }

    #[test]
    fn test_interpolation_uses_string_forms() {
        let input = json!({"name": "Ada", "age": 36, "tags": ["a"]});
        assert_eq!(
            eval("${{ json.name }} is ${{ json.age }} ${{ json.tags }}", input),
            json!("Ada is 36 [\"a\"]")
        );
    }

    #[test]
    fn test_json_looking_result_is_parsed() {
        let input = json!({"id": 3});
        assert_eq!(eval("{\"id\": ${{ json.id }}}", input), json!({"id": 3}));
        assert_eq!(eval("{not json ${{ json.id }}", json!({"id": 3})), json!("{not json 3"));
    }

    #[test]
    fn test_vars_lookup() {
        assert_eq!(eval("${{ $vars.execution.id }}", json!({})), json!("exec-1"));
        assert_eq!(eval("${{ $vars.workflow.name }}", json!({})), json!("Demo"));
    }

    #[test]
    fn test_node_result_lookup_uses_main() {
        let mut results = HashMap::new();
        results.insert("http-1".to_string(), NodeOutput::normalize(json!({"main": {"status": 200}})));
        let input = json!({"status": "local"});
        let vars = json!({});
        let scope = EvalScope::new(&results, &input, &vars);

        assert_eq!(scope.evaluate_str("${{ $json.http-1.status }}"), json!(200));
        assert_eq!(scope.evaluate_str("${{ $json.status }}"), json!("local"));
    }

    #[test]
    fn test_arithmetic_respects_precedence() {
        let input = json!({"a": 2, "b": 3, "c": 4});
        assert_eq!(eval("${{ json.a + json.b * json.c }}", input.clone()), json!(14.0));
        assert_eq!(eval("${{ (json.a + json.b) * json.c }}", input.clone()), json!(20.0));
        assert_eq!(eval("${{ json.c - json.a - 1 }}", input.clone()), json!(1.0));
        assert_eq!(eval("${{ -json.a * 2 }}", input), json!(-4.0));
    }

    #[test]
    fn test_unspaced_minus_is_subtraction() {
        let input = json!({"count": 5, "x": 3, "a": 10, "b": 4});
        assert_eq!(eval("${{ x-1 }}", input.clone()), json!(2.0));
        assert_eq!(eval("${{ a-b }}", input.clone()), json!(6.0));
        assert_eq!(eval("${{ json.count-json.x }}", input), json!(2.0));
    }

    #[test]
    fn test_division_by_zero_yields_zero() {
        assert_eq!(eval("${{ json.a / json.zero }}", json!({"a": 5, "zero": 0})), json!(0.0));
    }

    #[test]
    fn test_non_numeric_operands_count_as_zero() {
        assert_eq!(eval("${{ json.word + 2 }}", json!({"word": "abc"})), json!(2.0));
        assert_eq!(eval("${{ json.n + 2 }}", json!({"n": "40"})), json!(42.0));
    }

    #[test]
    fn test_failed_block_keeps_literal_text() {
        assert_eq!(eval("${{ json.a >= 2 }}", json!({"a": 3})), json!("${{ json.a >= 2 }}"));
        assert_eq!(
            eval("x=${{ (1 + }} y=${{ json.a }}", json!({"a": 3})),
            json!("x=${{ (1 + }} y=3")
        );
    }

    #[test]
    fn test_resolve_properties_only_touches_expressions() {
        let results = HashMap::new();
        let input = json!({"v": 1});
        let vars = json!({});
        let scope = EvalScope::new(&results, &input, &vars);

        let mut props = Map::new();
        props.insert("literal".into(), json!("keep ${ me }"));
        props.insert("number".into(), json!(5));
        props.insert("expr".into(), json!("${{ json.v }}"));

        let resolved = scope.resolve_properties(&props);
        assert_eq!(resolved["literal"], "keep ${ me }");
        assert_eq!(resolved["number"], 5);
        assert_eq!(resolved["expr"], 1);
        assert_eq!(props["expr"], "${{ json.v }}");
    }

    #[test]
    fn test_lookup_path_stops_on_scalars() {
        let value = json!({"a": "text"});
        assert_eq!(lookup_path(&value, "a.b"), None);
        assert_eq!(lookup_path(&value, ""), Some(value.clone()));
    }
}
