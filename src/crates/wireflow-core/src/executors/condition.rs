//! Conditional branch: evaluates ordered rules and nominates `true`/`false`
//!
//! A condition node holds an ordered rule list. Each rule resolves an
//! input reference against the context, applies one operator, and joins
//! onto the running result with `and`/`or`. Evaluation is strictly
//! left-to-right with uniform precedence: there is no binding preference
//! between `and` and `or`, the running result folds one rule at a time.
//!
//! Comparison semantics:
//! - `equals`/`not_equals`/`contains`/`not_contains` compare literal text
//!   (`contains` also matches array membership)
//! - the four ordering operators require both sides to parse as numbers,
//!   otherwise the rule is false
//! - `regex` matches the resolved text against the compare pattern; an
//!   invalid pattern makes the rule false
//! - `is_empty`/`is_not_empty` treat null, `""`, `[]`, `{}`, and
//!   unresolved references as empty

use super::{NodeExecution, NodeExecutor};
use crate::bus::EventEmitter;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::workflow::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    IsEmpty,
    IsNotEmpty,
    Regex,
}

impl ConditionOperator {
    /// Whether this operator consumes a compare value.
    pub fn needs_compare_value(&self) -> bool {
        !matches!(self, ConditionOperator::IsEmpty | ConditionOperator::IsNotEmpty)
    }
}

/// How a rule's verdict joins onto the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleJoiner {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    /// Reference into upstream outputs; `{{..}}` wrapping is accepted
    pub input_reference: String,
    pub operator: ConditionOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_value: Option<Value>,
    /// Joiner between the running result and this rule; ignored on the
    /// first rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joiner: Option<RuleJoiner>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNodeConfig {
    pub rules: Vec<ConditionRule>,
}

pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn validate(&self, node: &Node) -> Result<()> {
        let config: ConditionNodeConfig = node.typed_config()?;
        if config.rules.is_empty() {
            return Err(EngineError::node_config(&node.id, "condition requires at least one rule"));
        }
        for (index, rule) in config.rules.iter().enumerate() {
            if rule.input_reference.trim().is_empty() {
                return Err(EngineError::node_config(
                    &node.id,
                    format!("rule {index} has an empty input reference"),
                ));
            }
            if rule.operator.needs_compare_value() && rule.compare_value.is_none() {
                return Err(EngineError::node_config(
                    &node.id,
                    format!("rule {index} operator requires a compare value"),
                ));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: Arc<ExecutionContext>,
        _emitter: EventEmitter,
    ) -> Result<NodeExecution> {
        let config: ConditionNodeConfig = node.typed_config()?;

        let mut verdict = false;
        let mut reasons: Vec<String> = Vec::with_capacity(config.rules.len());

        for (index, rule) in config.rules.iter().enumerate() {
            let (rule_verdict, reason) = evaluate_rule(rule, &ctx);
            verdict = if index == 0 {
                rule_verdict
            } else {
                match rule.joiner.unwrap_or_default() {
                    RuleJoiner::And => verdict && rule_verdict,
                    RuleJoiner::Or => verdict || rule_verdict,
                }
            };
            reasons.push(reason);
        }

        tracing::debug!(node = %node.id, verdict, "condition evaluated");
        Ok(NodeExecution::of(json!({"condition": verdict, "reasons": reasons})))
    }

    fn output_handle(&self, result: &NodeExecution, _node: &Node) -> Option<String> {
        let verdict = result.output["condition"].as_bool().unwrap_or(false);
        Some(if verdict { "true" } else { "false" }.to_string())
    }
}

fn evaluate_rule(rule: &ConditionRule, ctx: &ExecutionContext) -> (bool, String) {
    let reference = rule
        .input_reference
        .trim()
        .trim_start_matches("{{")
        .trim_end_matches("}}")
        .trim();
    let resolved = ctx.resolve_reference(reference);
    let compare = rule.compare_value.as_ref();

    let verdict = match rule.operator {
        ConditionOperator::IsEmpty => is_empty(resolved.as_ref()),
        ConditionOperator::IsNotEmpty => !is_empty(resolved.as_ref()),
        _ => match (&resolved, compare) {
            (Some(value), Some(compare)) => apply_operator(rule.operator, value, compare),
            // Unresolved references and missing compare values fail the rule.
            _ => false,
        },
    };

    let reason = format!(
        "{reference} {:?} {} => {verdict}",
        rule.operator,
        compare.map(as_text).unwrap_or_default(),
    );
    (verdict, reason)
}

fn apply_operator(operator: ConditionOperator, value: &Value, compare: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => as_text(value) == as_text(compare),
        ConditionOperator::NotEquals => as_text(value) != as_text(compare),
        ConditionOperator::Contains => contains(value, compare),
        ConditionOperator::NotContains => !contains(value, compare),
        ConditionOperator::GreaterThan => numeric(value, compare).map(|(l, r)| l > r).unwrap_or(false),
        ConditionOperator::LessThan => numeric(value, compare).map(|(l, r)| l < r).unwrap_or(false),
        ConditionOperator::GreaterThanOrEquals => {
            numeric(value, compare).map(|(l, r)| l >= r).unwrap_or(false)
        }
        ConditionOperator::LessThanOrEquals => {
            numeric(value, compare).map(|(l, r)| l <= r).unwrap_or(false)
        }
        ConditionOperator::Regex => match regex::Regex::new(&as_text(compare)) {
            Ok(pattern) => pattern.is_match(&as_text(value)),
            Err(error) => {
                tracing::warn!(%error, "invalid regex in condition rule");
                false
            }
        },
        ConditionOperator::IsEmpty | ConditionOperator::IsNotEmpty => unreachable!("handled above"),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((as_number(left)?, as_number(right)?))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn contains(value: &Value, needle: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| as_text(item) == as_text(needle)),
        other => as_text(other).contains(&as_text(needle)),
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}
