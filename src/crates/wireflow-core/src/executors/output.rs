//! Output terminal: captures what flowed into it.

use super::{gather_predecessor_outputs, NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::workflow::Node;
use async_trait::async_trait;
use std::sync::Arc;

/// Returns the single predecessor's output, or a name-keyed map when
/// several predecessors completed. No side effects.
pub struct OutputExecutor;

#[async_trait]
impl NodeExecutor for OutputExecutor {
    fn validate(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        _emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        Ok(NodeExecution::of(gather_predecessor_outputs(node, &ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::workflow::{Edge, NodeType, Workflow};
    use serde_json::json;

    fn setup(preds: &[(&str, &str)]) -> (Arc<ExecutionContext>, Node, EventEmitter) {
        let mut wf = Workflow::new("wf", "Test");
        for (id, name) in preds {
            wf.nodes.push(Node::new(*id, *name, NodeType::Javascript, json!({})));
            wf.edges.push(Edge::new(format!("e-{id}"), *id, "out"));
        }
        wf.nodes.push(Node::new("out", "Output", NodeType::Output, json!({})));
        let ctx = Arc::new(ExecutionContext::new(Arc::new(wf), "exec", None));
        let bus = Arc::new(EventBus::new("exec", 4));
        let emitter = EventEmitter::new(bus, "out", "Output");
        let node = Node::new("out", "Output", NodeType::Output, json!({}));
        (ctx, node, emitter)
    }

    #[tokio::test]
    async fn single_predecessor_passes_through() {
        let (ctx, node, emitter) = setup(&[("a", "A")]);
        ctx.mark_running("a");
        ctx.mark_complete("a", json!("result-a"));

        let result = OutputExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!("result-a"));
    }

    #[tokio::test]
    async fn multiple_predecessors_map_by_name() {
        let (ctx, node, emitter) = setup(&[("a", "A"), ("b", "B")]);
        ctx.mark_complete("a", json!(1));
        ctx.mark_complete("b", json!(2));

        let result = OutputExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!({"A": 1, "B": 2}));
    }

    #[tokio::test]
    async fn skipped_predecessors_contribute_nothing() {
        let (ctx, node, emitter) = setup(&[("a", "A"), ("b", "B")]);
        ctx.mark_complete("a", json!(1));
        ctx.mark_skipped("b");

        let result = OutputExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!(1));
    }
}
