//! Scripted transform: evaluates host-provided code over a value bag
//!
//! The executor owns everything around the evaluation: selecting which
//! predecessor outputs to inject, the deadline, cancellation, and error
//! mapping. The evaluation itself is the host's [`ScriptRunner`]
//! capability; scripts may read nothing outside the input bag and must
//! return a JSON-representable value.

use super::{NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::runner::ScriptRunner;
use crate::workflow::Node;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use wireflow_store::NodeStatus;

/// Selects one upstream output for injection, optionally renamed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    /// Node name (preferred) or node id
    pub node: String,
    /// Key the output appears under in the input bag; defaults to `node`
    #[serde(default)]
    pub r#as: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptNodeConfig {
    pub code: String,

    /// Deadline in milliseconds; engine default when absent
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Which predecessor outputs to inject; all completed predecessors
    /// (keyed by node name) when absent
    #[serde(default)]
    pub input_mappings: Option<Vec<InputMapping>>,
}

pub struct ScriptExecutor {
    runner: Arc<dyn ScriptRunner>,
    default_timeout_ms: u64,
}

impl ScriptExecutor {
    pub fn new(runner: Arc<dyn ScriptRunner>, default_timeout_ms: u64) -> Self {
        Self {
            runner,
            default_timeout_ms,
        }
    }

    fn build_inputs(config: &ScriptNodeConfig, node: &Node, ctx: &ExecutionContext) -> Value {
        let mut bag = Map::new();
        match &config.input_mappings {
            Some(mappings) => {
                for mapping in mappings {
                    // Prefer name lookup, fall back to raw id.
                    let node_id = ctx
                        .node_id_for_name(&mapping.node)
                        .unwrap_or(mapping.node.as_str())
                        .to_string();
                    if let Some(output) = ctx.output_of(&node_id) {
                        let key = mapping.r#as.clone().unwrap_or_else(|| mapping.node.clone());
                        bag.insert(key, output);
                    }
                }
            }
            None => {
                for pred_id in ctx.predecessors_of(&node.id) {
                    if ctx.status_of(&pred_id) != NodeStatus::Complete {
                        continue;
                    }
                    if let Some(output) = ctx.output_of(&pred_id) {
                        let name = ctx
                            .node_name_for_id(&pred_id)
                            .unwrap_or(pred_id.as_str())
                            .to_string();
                        bag.insert(name, output);
                    }
                }
            }
        }
        Value::Object(bag)
    }
}

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        let config: ScriptNodeConfig = node.typed_config()?;
        if config.code.trim().is_empty() {
            return Err(EngineError::node_config(&node.id, "script code must not be empty"));
        }
        if config.timeout == Some(0) {
            return Err(EngineError::node_config(&node.id, "script timeout must be positive"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        _emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let config: ScriptNodeConfig = node.typed_config()?;
        let inputs = Self::build_inputs(&config, node, &ctx);
        let timeout_ms = config.timeout.unwrap_or(self.default_timeout_ms);
        let cancel = ctx.cancel_token();

        let evaluation = self.runner.evaluate(&config.code, inputs);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), evaluation) => result,
        };

        match outcome {
            Ok(Ok(value)) => Ok(NodeExecution::of(value)),
            Ok(Err(error)) => match error {
                EngineError::Cancelled => Err(EngineError::Cancelled),
                EngineError::Timeout { .. } => Err(error),
                other => Err(EngineError::script(&node.id, other.to_string())),
            },
            Err(_elapsed) => Err(EngineError::timeout(
                format!("script in node '{}'", node.id),
                timeout_ms,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::workflow::{Edge, NodeType, Workflow};
    use serde_json::json;

    /// Test runner: "keys" lists the bag keys, "sleep" stalls forever,
    /// "throw" fails, anything else echoes the bag.
    struct FakeScript;

    #[async_trait]
    impl ScriptRunner for FakeScript {
        async fn evaluate(&self, code: &str, inputs: Value) -> Result<Value> {
            match code {
                "keys" => {
                    let mut keys: Vec<String> = inputs
                        .as_object()
                        .map(|m| m.keys().cloned().collect())
                        .unwrap_or_default();
                    keys.sort();
                    Ok(json!(keys))
                }
                "sleep" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Value::Null)
                }
                "throw" => Err(EngineError::Custom("boom at line 3".into())),
                _ => Ok(inputs),
            }
        }
    }

    fn setup(config: Value) -> (Arc<ExecutionContext>, Node, EventEmitter) {
        let mut wf = Workflow::new("wf", "Test");
        for (id, name) in [("a", "Alpha"), ("b", "Beta")] {
            wf.nodes.push(Node::new(id, name, NodeType::Javascript, json!({})));
            wf.edges.push(Edge::new(format!("e-{id}"), id, "js"));
        }
        wf.nodes.push(Node::new("js", "Script", NodeType::Javascript, config.clone()));
        let ctx = Arc::new(ExecutionContext::new(Arc::new(wf), "exec", None));
        ctx.mark_complete("a", json!(1));
        ctx.mark_complete("b", json!(2));
        let bus = Arc::new(EventBus::new("exec", 4));
        let emitter = EventEmitter::new(bus, "js", "Script");
        let node = Node::new("js", "Script", NodeType::Javascript, config);
        (ctx, node, emitter)
    }

    fn executor() -> ScriptExecutor {
        ScriptExecutor::new(Arc::new(FakeScript), 30_000)
    }

    #[tokio::test]
    async fn default_bag_holds_all_completed_predecessors() {
        let (ctx, node, emitter) = setup(json!({"code": "keys"}));
        let result = executor().execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!(["Alpha", "Beta"]));
    }

    #[tokio::test]
    async fn input_mappings_select_and_rename() {
        let (ctx, node, emitter) = setup(json!({
            "code": "echo",
            "inputMappings": [{"node": "Alpha", "as": "left"}]
        }));
        let result = executor().execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!({"left": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout_error() {
        let (ctx, node, emitter) = setup(json!({"code": "sleep", "timeout": 50}));
        let err = executor().execute(&node, ctx, emitter).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { duration_ms: 50, .. }));
    }

    #[tokio::test]
    async fn throw_maps_to_script_error() {
        let (ctx, node, emitter) = setup(json!({"code": "throw"}));
        let err = executor().execute(&node, ctx, emitter).await.unwrap_err();
        match err {
            EngineError::Script { node, message } => {
                assert_eq!(node, "js");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_wins_over_evaluation() {
        let (ctx, node, emitter) = setup(json!({"code": "sleep"}));
        ctx.cancel_token().cancel();
        let err = executor().execute(&node, ctx, emitter).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn validation_requires_code() {
        let node = Node::new("js", "Script", NodeType::Javascript, json!({"code": "  "}));
        assert!(executor().validate(&node).is_err());
        let node = Node::new("js", "Script", NodeType::Javascript, json!({}));
        assert!(executor().validate(&node).is_err());
    }
}
