//! Input terminal: hands the workflow input to the graph.

use super::{NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::workflow::Node;
use async_trait::async_trait;
use std::sync::Arc;

/// Returns the workflow input verbatim.
pub struct InputExecutor;

#[async_trait]
impl NodeExecutor for InputExecutor {
    fn validate(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        _node: &Node,
        ctx: Arc<ExecutionContext>,
        _emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        Ok(NodeExecution::of(ctx.workflow_input()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::workflow::{NodeType, Workflow};
    use serde_json::json;

    #[tokio::test]
    async fn returns_workflow_input_verbatim() {
        let mut wf = Workflow::new("wf", "Test");
        wf.nodes.push(Node::new("in", "Input", NodeType::Input, json!({})));
        let ctx = Arc::new(ExecutionContext::new(Arc::new(wf), "exec", None));
        ctx.set_workflow_input(json!({"query": "hello"}));

        let bus = Arc::new(EventBus::new("exec", 4));
        let emitter = EventEmitter::new(bus, "in", "Input");
        let node = Node::new("in", "Input", NodeType::Input, json!({}));

        let result = InputExecutor.execute(&node, ctx, emitter).await.unwrap();
        assert_eq!(result.output, json!({"query": "hello"}));
    }
}
