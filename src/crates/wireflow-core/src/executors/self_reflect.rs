//! Self-reflect node: proposes and (optionally) applies workflow mutations
//!
//! The executor drives an agent runner to produce a
//! [`WorkflowEvolution`], validates it against the *stored* workflow
//! (mutations never touch the in-flight run), and disposes of it per the
//! node's `evolutionMode`: `suggest` reports only, `dry-run` projects the
//! outcome without persisting, `auto-apply` persists through the
//! [`EvolutionApplier`]. Every proposal is journaled, applied or not, so
//! the audit trail is complete.
//!
//! The node always outputs
//! `{evolution, applied, validationErrors, beforeSnapshot, afterSnapshot}`.

use super::agent::{drive_agent, extract_json};
use super::{NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::evolution::{
    project_evolution, validate_evolution, EvolutionApplier, EvolutionMode, EvolutionRecord,
    EvolutionScope, ValidateOptions, WorkflowEvolution, WorkflowSnapshot,
};
use crate::runner::{AgentOutcome, AgentRequest, AgentRunner, OutputFormat};
use crate::schema::NodeConfigSchema;
use crate::workflow::{Node, NodeType, Workflow};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use wireflow_store::Store;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a workflow architect. Analyze the workflow you are \
part of and propose improvements as a JSON object with fields: reasoning (string), mutations \
(array of mutation objects), expectedImpact (string), riskAssessment (string). Respond with \
JSON only.";

/// Which agent runner drives the reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReflectAgentType {
    #[default]
    Claude,
    Codex,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfReflectConfig {
    pub reflection_goal: String,

    #[serde(default)]
    pub agent_type: ReflectAgentType,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub evolution_mode: EvolutionMode,
    #[serde(default)]
    pub scope: Option<Vec<EvolutionScope>>,
    #[serde(default)]
    pub max_mutations: Option<usize>,
    #[serde(default)]
    pub include_transcripts: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

pub struct SelfReflectExecutor {
    claude: Arc<dyn AgentRunner>,
    codex: Arc<dyn AgentRunner>,
    store: Arc<dyn Store>,
    applier: Arc<EvolutionApplier>,
    schemas: HashMap<NodeType, Arc<NodeConfigSchema>>,
}

impl SelfReflectExecutor {
    pub fn new(
        claude: Arc<dyn AgentRunner>,
        codex: Arc<dyn AgentRunner>,
        store: Arc<dyn Store>,
        applier: Arc<EvolutionApplier>,
        schemas: HashMap<NodeType, Arc<NodeConfigSchema>>,
    ) -> Self {
        Self {
            claude,
            codex,
            store,
            applier,
            schemas,
        }
    }

    /// The stored workflow is the mutation target; the in-flight copy is
    /// only a fallback for workflows that were never persisted.
    async fn load_target(&self, ctx: &ExecutionContext) -> Result<Workflow> {
        match self.store.get_workflow(&ctx.workflow_id).await? {
            Some(document) => Ok(serde_json::from_value(document)?),
            None => Ok(ctx.workflow().as_ref().clone()),
        }
    }

    fn build_prompt(config: &SelfReflectConfig, workflow: &Workflow, ctx: &ExecutionContext) -> Result<String> {
        let goal = ctx.interpolate(&config.reflection_goal);
        let workflow_json = serde_json::to_string_pretty(workflow)?;

        let mut prompt = format!(
            "Reflection goal: {goal}\n\nCurrent workflow definition:\n{workflow_json}\n"
        );
        if config.include_transcripts {
            let outputs = serde_json::to_string_pretty(&ctx.outputs_snapshot())?;
            prompt.push_str(&format!("\nNode outputs from the current run:\n{outputs}\n"));
        }
        prompt.push_str(
            "\nPropose mutations using ops: update-node-config, update-prompt, update-model, \
             add-node, remove-node, add-edge, remove-edge, update-workflow-setting.",
        );
        Ok(prompt)
    }

    fn parse_evolution(outcome: &AgentOutcome, node_id: &str) -> Result<WorkflowEvolution> {
        let value = match &outcome.output {
            Value::Object(_) => outcome.output.clone(),
            Value::String(text) => extract_json(text).ok_or_else(|| {
                EngineError::agent(node_id, "reflection output contained no JSON object")
            })?,
            other => {
                return Err(EngineError::agent(
                    node_id,
                    format!("reflection output must be an object, got {other}"),
                ))
            }
        };
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl NodeExecutor for SelfReflectExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        let config: SelfReflectConfig = node.typed_config()?;
        if config.reflection_goal.trim().is_empty() {
            return Err(EngineError::node_config(&node.id, "reflectionGoal must not be empty"));
        }
        if config.max_mutations == Some(0) {
            return Err(EngineError::node_config(&node.id, "maxMutations must be positive"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let config: SelfReflectConfig = node.typed_config()?;
        let target = self.load_target(&ctx).await?;

        let request = AgentRequest {
            prompt: Self::build_prompt(&config, &target, &ctx)?,
            system_prompt: Some(
                config
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
            model: config.model.clone(),
            output_format: OutputFormat::Json,
            ..AgentRequest::default()
        };
        let runner = match config.agent_type {
            ReflectAgentType::Claude => &self.claude,
            ReflectAgentType::Codex => &self.codex,
        };

        let outcome = drive_agent(runner, request, &node.id, &ctx, &emitter, None)
            .await
            .map_err(|error| match error {
                EngineError::Cancelled | EngineError::Timeout { .. } => error,
                other => EngineError::agent(&node.id, other.to_string()),
            })?;
        let evolution = Self::parse_evolution(&outcome, &node.id)?;

        let options = ValidateOptions {
            scope: config.scope.clone(),
            max_mutations: config.max_mutations,
            self_node_id: Some(node.id.clone()),
        };
        let validation = validate_evolution(&target, &evolution, &self.schemas, &options);
        tracing::info!(
            node = %node.id,
            valid = validation.valid,
            mutations = validation.sanitized.mutations.len(),
            mode = ?config.evolution_mode,
            "reflection validated"
        );

        let before_snapshot = WorkflowSnapshot::capture(&target);
        let mut after_snapshot: Option<WorkflowSnapshot> = None;
        let mut applied = false;

        if validation.valid {
            match config.evolution_mode {
                EvolutionMode::Suggest => {}
                EvolutionMode::DryRun => {
                    let projected = project_evolution(&target, &validation.sanitized.mutations)?;
                    after_snapshot = Some(WorkflowSnapshot::capture(&projected));
                }
                EvolutionMode::AutoApply => {
                    let (_, record) = self
                        .applier
                        .apply(
                            &target,
                            &validation.sanitized,
                            &ctx.execution_id,
                            &node.id,
                            config.evolution_mode,
                        )
                        .await?;
                    after_snapshot = record.after_snapshot.clone();
                    applied = true;
                }
            }
        }

        // Applied batches were journaled by the applier; journal the rest
        // so rejected and advisory proposals stay auditable.
        if !applied {
            let record = EvolutionRecord {
                timestamp: Utc::now(),
                workflow_id: ctx.workflow_id.clone(),
                execution_id: ctx.execution_id.clone(),
                self_node_id: node.id.clone(),
                mode: config.evolution_mode,
                mutations: validation.sanitized.mutations.clone(),
                before_snapshot: before_snapshot.clone(),
                after_snapshot: after_snapshot.clone(),
                applied: false,
                reasoning: validation.sanitized.reasoning.clone(),
                expected_impact: validation.sanitized.expected_impact.clone(),
                risk_assessment: validation.sanitized.risk_assessment.clone(),
                validation_errors: (!validation.valid).then(|| validation.errors.clone()),
            };
            self.applier.journal(&record).await?;
        }

        Ok(NodeExecution::of(json!({
            "evolution": validation.sanitized,
            "applied": applied,
            "validationErrors": validation.errors,
            "beforeSnapshot": before_snapshot,
            "afterSnapshot": after_snapshot,
        })))
    }
}
