//! Declarative config schemas per node type
//!
//! Each node type declares its recognized configuration properties as a
//! flat table of dotted paths with a value kind and a required flag. Two
//! consumers: executor `validate` uses the required flags for add-node
//! checks, and the evolution validator resolves `update-node-config`
//! paths against these tables (path existence, type match, scope
//! inference).
//!
//! The tables are intentionally hand-modelled rather than JSON Schema
//! documents: the validator needs per-path property lookup and kind
//! matching, not draft-7 evaluation.

use crate::workflow::NodeType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Coarse JSON value kind for property type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Anything; used for schema bags and nested freeform values
    Any,
}

impl ValueKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
            ValueKind::Any => true,
        }
    }

    /// Whether dotted paths may continue below a property of this kind.
    pub fn admits_nesting(&self) -> bool {
        matches!(self, ValueKind::Array | ValueKind::Object | ValueKind::Any)
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// One declared configuration property.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    /// Dotted path from the config root, e.g. `outputConfig.format`
    pub path: &'static str,
    pub kind: ValueKind,
    pub required: bool,
}

const fn prop(path: &'static str, kind: ValueKind) -> PropertySchema {
    PropertySchema {
        path,
        kind,
        required: false,
    }
}

const fn required(path: &'static str, kind: ValueKind) -> PropertySchema {
    PropertySchema {
        path,
        kind,
        required: true,
    }
}

/// The declared configuration surface of one node type.
#[derive(Debug, Clone)]
pub struct NodeConfigSchema {
    pub node_type: NodeType,
    pub properties: Vec<PropertySchema>,
}

impl NodeConfigSchema {
    /// Exact declared property at `path`, if any.
    pub fn property(&self, path: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.path == path)
    }

    /// Resolve a dotted path against the table.
    ///
    /// Exact declarations win. Otherwise the longest declared prefix
    /// whose kind admits nesting resolves to [`ValueKind::Any`]. `None`
    /// means the path is outside the declared surface.
    pub fn resolve_path(&self, path: &str) -> Option<ValueKind> {
        if let Some(declared) = self.property(path) {
            return Some(declared.kind);
        }
        self.properties
            .iter()
            .filter(|p| {
                p.kind.admits_nesting()
                    && path.starts_with(p.path)
                    && path[p.path.len()..].starts_with('.')
            })
            .max_by_key(|p| p.path.len())
            .map(|_| ValueKind::Any)
    }

    /// Whether this type declares a `model` property.
    pub fn has_model(&self) -> bool {
        self.property("model").is_some()
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter().filter(|p| p.required)
    }
}

fn agent_schema(node_type: NodeType) -> NodeConfigSchema {
    NodeConfigSchema {
        node_type,
        properties: vec![
            required("userQuery", ValueKind::String),
            prop("model", ValueKind::String),
            prop("systemPrompt", ValueKind::String),
            prop("tools", ValueKind::Array),
            prop("mcpServers", ValueKind::Array),
            prop("workingDirectory", ValueKind::String),
            prop("maxTurns", ValueKind::Number),
            prop("timeout", ValueKind::Number),
            prop("conversationMode", ValueKind::String),
            prop("outputConfig", ValueKind::Object),
            prop("outputConfig.format", ValueKind::String),
            prop("outputConfig.schema", ValueKind::Any),
            prop("rejectionHandler", ValueKind::Object),
            prop("rejectionHandler.maxRetries", ValueKind::Number),
            prop("rejectionHandler.onMaxRetries", ValueKind::String),
            prop("rejectionHandler.continueSession", ValueKind::Boolean),
            prop("rejectionHandler.feedbackTemplate", ValueKind::String),
        ],
    }
}

/// The built-in schema table, one entry per node type.
pub fn builtin_schemas() -> HashMap<NodeType, Arc<NodeConfigSchema>> {
    let mut schemas = HashMap::new();

    schemas.insert(
        NodeType::Input,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Input,
            properties: vec![],
        }),
    );
    schemas.insert(
        NodeType::Output,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Output,
            properties: vec![],
        }),
    );
    schemas.insert(NodeType::ClaudeAgent, Arc::new(agent_schema(NodeType::ClaudeAgent)));
    schemas.insert(NodeType::CodexAgent, Arc::new(agent_schema(NodeType::CodexAgent)));
    schemas.insert(
        NodeType::Condition,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Condition,
            properties: vec![required("rules", ValueKind::Array)],
        }),
    );
    schemas.insert(
        NodeType::Merge,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Merge,
            properties: vec![prop("strategy", ValueKind::String)],
        }),
    );
    schemas.insert(
        NodeType::Javascript,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Javascript,
            properties: vec![
                required("code", ValueKind::String),
                prop("timeout", ValueKind::Number),
                prop("inputMappings", ValueKind::Array),
            ],
        }),
    );
    schemas.insert(
        NodeType::Approval,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::Approval,
            properties: vec![
                required("promptMessage", ValueKind::String),
                required("inputSelections", ValueKind::Array),
                prop("feedbackPrompt", ValueKind::String),
                prop("timeoutMinutes", ValueKind::Number),
                prop("timeoutAction", ValueKind::String),
            ],
        }),
    );
    schemas.insert(
        NodeType::SelfReflect,
        Arc::new(NodeConfigSchema {
            node_type: NodeType::SelfReflect,
            properties: vec![
                required("reflectionGoal", ValueKind::String),
                prop("agentType", ValueKind::String),
                prop("model", ValueKind::String),
                prop("evolutionMode", ValueKind::String),
                prop("scope", ValueKind::Array),
                prop("maxMutations", ValueKind::Number),
                prop("includeTranscripts", ValueKind::Boolean),
                prop("systemPrompt", ValueKind::String),
            ],
        }),
    );

    schemas
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_type_has_a_schema() {
        let schemas = builtin_schemas();
        for ty in NodeType::ALL {
            assert!(schemas.contains_key(&ty), "missing schema for {ty}");
        }
    }

    #[test]
    fn path_resolution() {
        let schemas = builtin_schemas();
        let agent = &schemas[&NodeType::ClaudeAgent];

        assert_eq!(agent.resolve_path("userQuery"), Some(ValueKind::String));
        assert_eq!(agent.resolve_path("outputConfig.format"), Some(ValueKind::String));
        // Undeclared nested path under an object property resolves loosely.
        assert_eq!(agent.resolve_path("outputConfig.extra"), Some(ValueKind::Any));
        // Paths outside the surface do not resolve.
        assert_eq!(agent.resolve_path("temperature"), None);
        // Scalars admit no nesting.
        assert_eq!(agent.resolve_path("model.nested"), None);
    }

    #[test]
    fn kind_matching() {
        assert!(ValueKind::String.matches(&json!("x")));
        assert!(!ValueKind::String.matches(&json!(4)));
        assert!(ValueKind::Number.matches(&json!(4.5)));
        assert!(ValueKind::Array.matches(&json!([])));
        assert!(ValueKind::Any.matches(&json!(null)));
    }

    #[test]
    fn model_declarations() {
        let schemas = builtin_schemas();
        assert!(schemas[&NodeType::ClaudeAgent].has_model());
        assert!(schemas[&NodeType::SelfReflect].has_model());
        assert!(!schemas[&NodeType::Condition].has_model());
        assert!(!schemas[&NodeType::Input].has_model());
    }

    #[test]
    fn required_properties_listed() {
        let schemas = builtin_schemas();
        let required: Vec<&str> = schemas[&NodeType::Approval]
            .required_properties()
            .map(|p| p.path)
            .collect();
        assert_eq!(required, vec!["promptMessage", "inputSelections"]);
    }
}
