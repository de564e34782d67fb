//! Merge points: fan-in with a configurable strategy
//!
//! Readiness for a merge node is the engine's responsibility (see the
//! engine's frontier computation); the executor only selects the output
//! once the engine decides the merge may run.
//!
//! - `wait-all`: every incoming active source must settle; the output is
//!   the single completed input, or a name-keyed map of all completed
//!   inputs. Skipped sources contribute nothing; an all-skipped merge is
//!   itself skipped and never executes.
//! - `first-complete`: the merge runs as soon as one source completes;
//!   the output is that source's output. Later completions are ignored.

use super::{gather_predecessor_outputs, NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::workflow::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use wireflow_store::NodeStatus;

/// Fan-in strategy of a merge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    #[default]
    WaitAll,
    FirstComplete,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MergeNodeConfig {
    strategy: MergeStrategy,
}

impl Default for MergeNodeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::WaitAll,
        }
    }
}

pub struct MergeExecutor;

impl MergeExecutor {
    /// The strategy configured on `node`, defaulting to `wait-all`.
    pub fn strategy_of(node: &Node) -> MergeStrategy {
        node.typed_config::<MergeNodeConfig>()
            .map(|c| c.strategy)
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeExecutor for MergeExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        node.typed_config::<MergeNodeConfig>().map(|_| ()).map_err(|_| {
            EngineError::node_config(
                &node.id,
                "merge strategy must be \"wait-all\" or \"first-complete\"",
            )
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        _emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let output = match Self::strategy_of(node) {
            MergeStrategy::WaitAll => gather_predecessor_outputs(node, &ctx),
            MergeStrategy::FirstComplete => first_complete_output(node, &ctx),
        };
        Ok(NodeExecution::with_metadata(
            output,
            json!({"strategy": Self::strategy_of(node)}),
        ))
    }
}

/// Output of the earliest-completed predecessor.
fn first_complete_output(node: &Node, ctx: &ExecutionContext) -> Value {
    let mut winner: Option<(chrono::DateTime<chrono::Utc>, Value)> = None;
    for pred_id in ctx.predecessors_of(&node.id) {
        let Some(state) = ctx.node_state(&pred_id) else { continue };
        if state.status != NodeStatus::Complete {
            continue;
        }
        let completed_at = state.completed_at.unwrap_or_else(chrono::Utc::now);
        let output = ctx.output_of(&pred_id).unwrap_or(Value::Null);
        match &winner {
            Some((best, _)) if *best <= completed_at => {}
            _ => winner = Some((completed_at, output)),
        }
    }
    winner.map(|(_, output)| output).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::workflow::{Edge, NodeType, Workflow};

    fn setup(config: Value) -> (Arc<ExecutionContext>, Node, EventEmitter) {
        let mut wf = Workflow::new("wf", "Test");
        for (id, name) in [("a", "A"), ("b", "B")] {
            wf.nodes.push(Node::new(id, name, NodeType::Javascript, json!({})));
            wf.edges.push(Edge::new(format!("e-{id}"), id, "merge"));
        }
        wf.nodes.push(Node::new("merge", "Merge", NodeType::Merge, config.clone()));
        let ctx = Arc::new(ExecutionContext::new(Arc::new(wf), "exec", None));
        let bus = Arc::new(EventBus::new("exec", 4));
        let emitter = EventEmitter::new(bus, "merge", "Merge");
        let node = Node::new("merge", "Merge", NodeType::Merge, config);
        (ctx, node, emitter)
    }

    #[tokio::test]
    async fn wait_all_maps_completed_inputs() {
        let (ctx, node, emitter) = setup(json!({"strategy": "wait-all"}));
        ctx.mark_complete("a", json!("alpha"));
        ctx.mark_complete("b", json!("beta"));

        let result = MergeExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!({"A": "alpha", "B": "beta"}));
    }

    #[tokio::test]
    async fn wait_all_with_one_skipped_passes_survivor_through() {
        let (ctx, node, emitter) = setup(json!({}));
        ctx.mark_complete("a", json!("alpha"));
        ctx.mark_skipped("b");

        let result = MergeExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!("alpha"));
    }

    #[tokio::test]
    async fn first_complete_picks_earliest() {
        let (ctx, node, emitter) = setup(json!({"strategy": "first-complete"}));
        ctx.mark_complete("b", json!("early"));
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ctx.mark_complete("a", json!("late"));

        let result = MergeExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!("early"));
    }

    #[test]
    fn invalid_strategy_fails_validation() {
        let node = Node::new("merge", "Merge", NodeType::Merge, json!({"strategy": "sometimes"}));
        assert!(MergeExecutor.validate(&node).is_err());
        let node = Node::new("merge", "Merge", NodeType::Merge, json!({}));
        assert!(MergeExecutor.validate(&node).is_ok());
    }
}
