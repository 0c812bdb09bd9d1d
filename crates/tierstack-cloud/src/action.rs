//! Planned actions and apply results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tierstack_core::ResourceType;

/// A planned action for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Logical id of the resource
    pub id: String,

    pub action_type: ActionType,

    pub resource_type: ResourceType,

    pub description: String,

    /// Additional details about the action
    pub details: HashMap<String, serde_json::Value>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        action_type: ActionType,
        resource_type: ResourceType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action_type,
            resource_type,
            description: description.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Change the properties of an existing resource in place
    Update,
    /// Delete a resource
    Delete,
    /// Keep a resource in place at teardown
    Retain,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Retain => write!(f, "retain"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying or destroying a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: Vec<ActionResult>,

    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Successful actions of one type
    pub fn count(&self, action_type: ActionType) -> usize {
        self.succeeded
            .iter()
            .filter(|r| r.action_type == action_type)
            .count()
    }

    pub fn add_success(&mut self, action_id: String, action_type: ActionType, message: String) {
        self.succeeded.push(ActionResult {
            action_id,
            action_type,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: String, action_type: ActionType, error: String) {
        self.failed.push(ActionResult {
            action_id,
            action_type,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub action_type: ActionType,
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

/// Every action an apply or destroy would take, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions
            .iter()
            .any(|a| matches!(
                a.action_type,
                ActionType::Create | ActionType::Update | ActionType::Delete
            ));
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            retain: self.actions_by_type(ActionType::Retain).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub retain: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} retained, {} unchanged",
            self.create, self.update, self.delete, self.retain, self.no_change
        )
    }
}
