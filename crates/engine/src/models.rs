//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a user-supplied workflow
//! looks like in memory. They serialise to/from the JSON definition a
//! frontend or repository hands over; the builder compiles them into an
//! immutable [`ExecutionPlan`](crate::plan::ExecutionPlan).

use chrono::{DateTime, Utc};
use nodes::OutputMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeDescriptor
// ---------------------------------------------------------------------------

/// A single step in the workflow graph, as the user described it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a registered `NodeHandler` implementation.
    pub node_type: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: String,
    /// Arbitrary configuration passed to the handler at execution time.
    #[serde(default)]
    pub config: OutputMap,
    /// Canvas position or other editor payload; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
}

impl NodeDescriptor {
    /// Convenience constructor; the display name defaults to the id.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: node_type.into(),
            config: OutputMap::new(),
            position: None,
        }
    }

    /// Attach a JSON object as the node's config.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config.as_object().cloned().unwrap_or_default();
        self
    }
}

// ---------------------------------------------------------------------------
// EdgeDescriptor
// ---------------------------------------------------------------------------

/// Directed connection between two nodes' ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    /// Edge id; assigned during build when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Named output port on the source (`error`, a route name, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    /// Named input port on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl EdgeDescriptor {
    /// A plain data edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_port: None,
            target_port: None,
        }
    }

    /// Set the source port (route name or `error`).
    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = Some(port.into());
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete user-supplied workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<NodeDescriptor>,
    pub edges: Vec<EdgeDescriptor>,
    /// Explicit entry node; when absent the entry is derived from node types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_node_id: Option<String>,
    /// Detached roots that should still be scheduled at level 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_entry_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Convenience constructor for tests and embedding code.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<NodeDescriptor>,
        edges: Vec<EdgeDescriptor>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
            entry_node_id: None,
            additional_entry_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Pin the entry node explicitly.
    pub fn with_entry(mut self, entry_node_id: impl Into<String>) -> Self {
        self.entry_node_id = Some(entry_node_id.into());
        self
    }
}
