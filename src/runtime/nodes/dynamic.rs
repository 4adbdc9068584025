/// Adapter that runs a registered dynamic node through the executor contract

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{NodeCall, NodeExecutor, NodeInputs, RuntimeContext};
use crate::{
    runtime::{
        error::EngineError,
        expression::{EvalScope, EXPRESSION_MARKER},
    },
    workflow::registry::{DynamicInvocation, DynamicNode},
};

pub struct DynamicNodeExecutor {
    node: Arc<DynamicNode>,
}

impl DynamicNodeExecutor {
    pub fn new(node: Arc<DynamicNode>) -> Self {
        Self { node }
    }

    /// Declared parameter values: property, else declared default, else null
    ///
    /// Expression strings are resolved against the node results, the `main`
    /// input and the workflow variables.
    fn bind_params(&self, call: &NodeCall<'_>, inputs: &NodeInputs, ctx: &RuntimeContext<'_>) -> Map<String, Value> {
        let scope = EvalScope::new(ctx.node_results, inputs.main(), ctx.vars);

        self.node
            .parameters
            .iter()
            .filter(|param| !matches!(param.name.as_str(), "inputs" | "context"))
            .map(|param| {
                let raw = call
                    .property(&param.name)
                    .cloned()
                    .unwrap_or_else(|| param.default.clone());
                let value = match &raw {
                    Value::String(text) if text.contains(EXPRESSION_MARKER) => scope.evaluate_str(text),
                    _ => raw,
                };
                (param.name.clone(), value)
            })
            .collect()
    }
}

impl NodeExecutor for DynamicNodeExecutor {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let invocation = DynamicInvocation {
                inputs: inputs.to_value(),
                context: ctx.to_value(),
                params: self.bind_params(call, inputs, ctx),
            };

            tracing::debug!("🧩 Invoking dynamic node {} with params {:?}", self.node.id, invocation.params);

            (self.node.handler)(invocation).await.map_err(|e| {
                tracing::error!("❌ Dynamic node {} failed: {}", self.node.id, e);
                anyhow::Error::from(EngineError::DynamicHandler {
                    node_type: self.node.id.clone(),
                    message: e.to_string(),
                })
            })
        })
    }
}
