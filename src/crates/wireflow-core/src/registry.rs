//! Node type registry
//!
//! Maps every [`NodeType`] tag to its executor and declared config
//! schema. The engine looks executors up at dispatch time; the evolution
//! validator reads the schema table. [`NodeRegistry::builtin`] wires the
//! standard executor set against the host's runner capabilities; hosts
//! with custom node semantics can [`register`](NodeRegistry::register)
//! replacements over individual types.

use crate::approval::ApprovalRegistry;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evolution::EvolutionApplier;
use crate::executors::{
    AgentExecutor, ApprovalExecutor, ConditionExecutor, InputExecutor, MergeExecutor,
    NodeExecutor, OutputExecutor, ScriptExecutor, SelfReflectExecutor,
};
use crate::runner::Runners;
use crate::schema::{builtin_schemas, NodeConfigSchema};
use crate::workflow::NodeType;
use std::collections::HashMap;
use std::sync::Arc;
use wireflow_store::{EvolutionHistory, Store};

/// Executor and schema lookup for the closed node type set.
pub struct NodeRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
    schemas: HashMap<NodeType, Arc<NodeConfigSchema>>,
}

impl NodeRegistry {
    /// An empty registry; useful for hosts assembling a custom set.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            schemas: builtin_schemas(),
        }
    }

    /// The standard executor set, wired against the host's capabilities.
    pub fn builtin(
        runners: Runners,
        approvals: Arc<ApprovalRegistry>,
        store: Arc<dyn Store>,
        history: EvolutionHistory,
        config: &EngineConfig,
    ) -> Self {
        let schemas = builtin_schemas();
        let applier = Arc::new(EvolutionApplier::new(Arc::clone(&store), history));

        let mut executors: HashMap<NodeType, Arc<dyn NodeExecutor>> = HashMap::new();
        executors.insert(NodeType::Input, Arc::new(InputExecutor));
        executors.insert(NodeType::Output, Arc::new(OutputExecutor));
        executors.insert(NodeType::Condition, Arc::new(ConditionExecutor));
        executors.insert(NodeType::Merge, Arc::new(MergeExecutor));
        executors.insert(
            NodeType::Javascript,
            Arc::new(ScriptExecutor::new(
                Arc::clone(&runners.script),
                config.default_script_timeout_ms,
            )),
        );
        executors.insert(
            NodeType::ClaudeAgent,
            Arc::new(AgentExecutor::new(Arc::clone(&runners.claude))),
        );
        executors.insert(
            NodeType::CodexAgent,
            Arc::new(AgentExecutor::new(Arc::clone(&runners.codex))),
        );
        executors.insert(NodeType::Approval, Arc::new(ApprovalExecutor::new(approvals)));
        executors.insert(
            NodeType::SelfReflect,
            Arc::new(SelfReflectExecutor::new(
                Arc::clone(&runners.claude),
                Arc::clone(&runners.codex),
                store,
                applier,
                schemas.clone(),
            )),
        );

        Self { executors, schemas }
    }

    /// Replace (or add) the executor for one node type; a custom schema
    /// replaces the built-in table entry when given.
    pub fn register(
        &mut self,
        node_type: NodeType,
        executor: Arc<dyn NodeExecutor>,
        schema: Option<NodeConfigSchema>,
    ) {
        self.executors.insert(node_type, executor);
        if let Some(schema) = schema {
            self.schemas.insert(node_type, Arc::new(schema));
        }
    }

    /// Executor for `node_type`; an unregistered type is an error, never
    /// a panic.
    pub fn executor_for(&self, node_type: NodeType) -> Result<Arc<dyn NodeExecutor>> {
        self.executors
            .get(&node_type)
            .cloned()
            .ok_or_else(|| EngineError::Custom(format!("no executor registered for '{node_type}'")))
    }

    pub fn schema_for(&self, node_type: NodeType) -> Option<Arc<NodeConfigSchema>> {
        self.schemas.get(&node_type).cloned()
    }

    /// The full schema table, for the evolution validator.
    pub fn schemas(&self) -> &HashMap<NodeType, Arc<NodeConfigSchema>> {
        &self.schemas
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as EngineResult;
    use crate::runner::{AgentOutcome, AgentRequest, AgentRunner, ScriptRunner};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wireflow_store::InMemoryStore;

    struct NullAgent;

    #[async_trait]
    impl AgentRunner for NullAgent {
        async fn run(
            &self,
            _request: AgentRequest,
            _chunks: mpsc::Sender<crate::event::NodeStreamEvent>,
            _cancel: CancellationToken,
        ) -> EngineResult<AgentOutcome> {
            Ok(AgentOutcome { output: Value::Null, session_id: None })
        }
    }

    struct NullScript;

    #[async_trait]
    impl ScriptRunner for NullScript {
        async fn evaluate(&self, _code: &str, inputs: Value) -> EngineResult<Value> {
            Ok(inputs)
        }
    }

    fn registry() -> NodeRegistry {
        let dir = std::env::temp_dir().join("wireflow-registry-test");
        NodeRegistry::builtin(
            Runners::uniform(Arc::new(NullAgent), Arc::new(NullScript)),
            Arc::new(ApprovalRegistry::new()),
            Arc::new(InMemoryStore::new()),
            EvolutionHistory::new(dir),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn builtin_covers_every_type() {
        let registry = registry();
        for ty in NodeType::ALL {
            assert!(registry.executor_for(ty).is_ok(), "missing executor for {ty}");
            assert!(registry.schema_for(ty).is_some(), "missing schema for {ty}");
        }
    }

    #[test]
    fn empty_registry_reports_missing_executor() {
        let registry = NodeRegistry::new();
        let err = match registry.executor_for(NodeType::Merge) {
            Err(e) => e,
            Ok(_) => panic!("expected missing executor error"),
        };
        assert!(err.to_string().contains("no executor registered"));
    }
}
