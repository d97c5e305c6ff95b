use crate::application::session::{NodePath, RuleUpdate, SessionSnapshot};
use crate::domain::condition::{LogicalOperator, Rule};
use crate::domain::policy::PolicyEffect;
use crate::domain::template::TemplateId;
use serde::Serialize;

/// Command to open a new authoring session, optionally editing a persisted policy
#[derive(Debug, Clone)]
pub struct StartAuthoringSessionCommand {
    pub action_code: Option<String>,
    pub policy_id: Option<String>,
}

/// Node to append under a group
#[derive(Debug, Clone)]
pub enum NewConditionNode {
    Rule(Rule),
    Group(LogicalOperator),
}

/// Command to add a rule or group under the group at `parent_path`
#[derive(Debug, Clone)]
pub struct AddConditionNodeCommand {
    pub session_id: String,
    pub parent_path: NodePath,
    pub node: NewConditionNode,
}

/// Command to edit the rule at `path`
#[derive(Debug, Clone)]
pub struct UpdateRuleCommand {
    pub session_id: String,
    pub path: NodePath,
    pub update: RuleUpdate,
}

/// Command to switch a group between `and` and `or`
#[derive(Debug, Clone)]
pub struct SetGroupOperatorCommand {
    pub session_id: String,
    pub path: NodePath,
    pub operator: LogicalOperator,
}

/// Command to delete the node at `path`
#[derive(Debug, Clone)]
pub struct DeleteConditionNodeCommand {
    pub session_id: String,
    pub path: NodePath,
}

/// Command to reorder a child within its group
#[derive(Debug, Clone)]
pub struct MoveConditionNodeCommand {
    pub session_id: String,
    pub parent_path: NodePath,
    pub from: usize,
    pub to: usize,
}

/// Command to adopt pasted condition text
#[derive(Debug, Clone)]
pub struct PasteConditionTextCommand {
    pub session_id: String,
    pub text: String,
}

/// Command to replace the whole condition with a loosely shaped tree
#[derive(Debug, Clone)]
pub struct ReplaceConditionCommand {
    pub session_id: String,
    pub condition: serde_json::Value,
}

/// Command to change the template selection and regenerate
#[derive(Debug, Clone)]
pub struct SelectTemplatesCommand {
    pub session_id: String,
    pub template_ids: Vec<TemplateId>,
}

/// Command to edit one template parameter and regenerate
#[derive(Debug, Clone)]
pub struct UpdateTemplateParameterCommand {
    pub session_id: String,
    pub template_id: TemplateId,
    pub key: String,
    pub value: serde_json::Value,
}

/// Command to persist the session's condition as a policy
#[derive(Debug, Clone)]
pub struct SavePolicyCommand {
    pub session_id: String,
    pub name: String,
    pub description: Option<String>,
    pub effect: PolicyEffect,
    pub priority: i32,
}

/// Command to drop an authoring session
#[derive(Debug, Clone)]
pub struct DiscardSessionCommand {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeAdded {
    pub path: NodePath,
    pub session: SessionSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// No template selected; the tree is left alone.
    Idle,
    /// Parameters incomplete; no request was sent.
    Skipped,
    Applied,
    /// A newer edit superseded this generation.
    Discarded,
    /// The previous tree was kept.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session: SessionSnapshot,
}
