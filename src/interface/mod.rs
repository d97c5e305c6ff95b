// Interface layer: HTTP API, DTOs

use crate::application::commands::{GenerationReport, GenerationStatus, NodeAdded};
use crate::application::queries::{ConditionPreview, NormalizedCondition};
use crate::application::session::SessionSnapshot;
use crate::application::validators::ParameterAssessment;
use crate::domain::attribute::{AttributeDefinition, AttributeOption};
use crate::domain::condition::ConditionNode;
use crate::domain::policy::{PolicyEffect, PolicyRecord};
use crate::domain::template::{PolicyTemplate, TemplateId, TemplateParameterMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

// --- Requests ---

#[derive(Deserialize, ToSchema, Default)]
pub struct StartSessionRequest {
    pub action_code: Option<String>,
    /// Persisted policy to edit; its conditions are loaded into the session.
    pub policy_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AddNodeRequest {
    #[serde(default)]
    pub parent_path: Vec<usize>,
    /// "rule" or "group"
    pub kind: String,
    pub field: Option<String>,
    pub operator: Option<String>,
    #[schema(value_type = Object)]
    pub value: Option<serde_json::Value>,
    pub group_operator: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    pub path: Vec<usize>,
    pub field: Option<String>,
    pub operator: Option<String>,
    #[schema(value_type = Object)]
    pub value: Option<serde_json::Value>,
}

#[derive(Deserialize, ToSchema)]
pub struct SetGroupOperatorRequest {
    #[serde(default)]
    pub path: Vec<usize>,
    pub operator: String,
}

#[derive(Deserialize, ToSchema)]
pub struct DeleteNodeRequest {
    pub path: Vec<usize>,
}

#[derive(Deserialize, ToSchema)]
pub struct MoveNodeRequest {
    #[serde(default)]
    pub parent_path: Vec<usize>,
    pub from: usize,
    pub to: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct PasteConditionRequest {
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ReplaceConditionRequest {
    #[schema(value_type = Object)]
    pub condition: serde_json::Value,
}

#[derive(Deserialize, ToSchema)]
pub struct SelectTemplatesRequest {
    pub template_ids: Vec<TemplateId>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateParameterRequest {
    pub template_id: TemplateId,
    pub key: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

#[derive(Deserialize, ToSchema)]
pub struct SavePolicyRequest {
    pub name: String,
    pub description: Option<String>,
    /// "allow" (default) or "deny"
    pub effect: Option<String>,
    pub priority: i32,
}

#[derive(Deserialize, ToSchema)]
pub struct NormalizeConditionRequest {
    /// A condition object, or condition text as a JSON string.
    #[schema(value_type = Object)]
    pub condition: serde_json::Value,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TemplatesQueryParams {
    pub action_code: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AttributeOptionsQueryParams {
    /// Comma separated attribute keys
    pub keys: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewQueryParams {
    #[serde(default)]
    pub pretty: bool,
}

// --- Responses ---

#[derive(Serialize, ToSchema)]
pub struct ParameterStatusResponse {
    pub template_id: TemplateId,
    pub missing_parameters: Vec<String>,
    pub needs_department_selection: bool,
}

impl From<ParameterAssessment> for ParameterStatusResponse {
    fn from(assessment: ParameterAssessment) -> Self {
        Self {
            template_id: assessment.template_id,
            missing_parameters: assessment.missing_parameters,
            needs_department_selection: assessment.needs_department_selection,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub action_code: Option<String>,
    pub policy_id: Option<String>,
    #[schema(value_type = Object)]
    pub condition: ConditionNode,
    pub selected_templates: Vec<TemplateId>,
    #[schema(value_type = Object)]
    pub parameters: TemplateParameterMap,
    pub parameter_status: Vec<ParameterStatusResponse>,
    pub needs_department_selection: bool,
    pub has_valid_rule: bool,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl From<SessionSnapshot> for SessionResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            action_code: snapshot.action_code,
            policy_id: snapshot.policy_id,
            condition: snapshot.condition,
            selected_templates: snapshot.selected_templates,
            parameters: snapshot.parameters,
            parameter_status: snapshot
                .parameter_status
                .into_iter()
                .map(ParameterStatusResponse::from)
                .collect(),
            needs_department_selection: snapshot.needs_department_selection,
            has_valid_rule: snapshot.has_valid_rule,
            last_error: snapshot.last_error,
            updated_at: snapshot.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct NodeAddedResponse {
    pub path: Vec<usize>,
    pub session: SessionResponse,
}

impl From<NodeAdded> for NodeAddedResponse {
    fn from(added: NodeAdded) -> Self {
        Self {
            path: added.path,
            session: added.session.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct GenerationResponse {
    /// idle, skipped, applied, discarded or failed
    pub status: String,
    pub message: Option<String>,
    pub session: SessionResponse,
}

impl From<GenerationReport> for GenerationResponse {
    fn from(report: GenerationReport) -> Self {
        let status = match report.status {
            GenerationStatus::Idle => "idle",
            GenerationStatus::Skipped => "skipped",
            GenerationStatus::Applied => "applied",
            GenerationStatus::Discarded => "discarded",
            GenerationStatus::Failed => "failed",
        };
        Self {
            status: status.to_string(),
            message: report.message,
            session: report.session.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PreviewResponse {
    pub text: String,
    pub has_valid_rule: bool,
    pub rule_count: usize,
}

impl From<ConditionPreview> for PreviewResponse {
    fn from(preview: ConditionPreview) -> Self {
        Self {
            text: preview.text,
            has_valid_rule: preview.has_valid_rule,
            rule_count: preview.rule_count,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PolicyResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub action_code: Option<String>,
    pub effect: String,
    pub priority: i32,
    pub template_ids: Vec<TemplateId>,
    #[schema(value_type = Object)]
    pub conditions: serde_json::Value,
}

impl From<PolicyRecord> for PolicyResponse {
    fn from(record: PolicyRecord) -> Self {
        let effect = match record.effect {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        };
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            action_code: record.action_code,
            effect: effect.to_string(),
            priority: record.priority,
            template_ids: record.template_ids,
            conditions: record.conditions,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TemplateListResponse {
    #[schema(value_type = Vec<Object>)]
    pub templates: Vec<PolicyTemplate>,
}

#[derive(Serialize, ToSchema)]
pub struct AttributeResponse {
    pub key: String,
    pub label: String,
    pub value_type: String,
    pub option_source: Option<String>,
    pub operators: Vec<String>,
}

impl From<AttributeDefinition> for AttributeResponse {
    fn from(attribute: AttributeDefinition) -> Self {
        let value_type = serde_json::to_value(attribute.value_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let option_source = attribute.option_source.and_then(|source| {
            serde_json::to_value(source)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
        });
        Self {
            key: attribute.key,
            label: attribute.label,
            value_type,
            option_source,
            operators: attribute
                .value_type
                .operators()
                .iter()
                .map(|op| op.as_str().to_string())
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AttributeListResponse {
    pub attributes: Vec<AttributeResponse>,
}

#[derive(Serialize, ToSchema)]
pub struct AttributeOptionsResponse {
    /// Options keyed by attribute key; each option is `{value, label}`.
    #[schema(value_type = Object)]
    pub options: BTreeMap<String, Vec<AttributeOption>>,
}

#[derive(Serialize, ToSchema)]
pub struct NormalizeConditionResponse {
    #[schema(value_type = Object)]
    pub condition: ConditionNode,
    pub has_valid_rule: bool,
}

impl From<NormalizedCondition> for NormalizeConditionResponse {
    fn from(normalized: NormalizedCondition) -> Self {
        Self {
            condition: normalized.condition,
            has_valid_rule: normalized.has_valid_rule,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DiscardSessionResponse {
    pub success: bool,
}

#[derive(serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub mod app_state;
pub mod http_handlers;

pub use app_state::AppState;
pub use http_handlers::{
    add_node_handler, delete_node_handler, discard_session_handler, get_session_handler,
    list_attribute_options_handler, list_attributes_handler, list_templates_handler,
    move_node_handler, normalize_condition_handler, paste_condition_handler,
    preview_condition_handler, replace_condition_handler, save_policy_handler,
    select_templates_handler, set_group_operator_handler, start_session_handler,
    update_parameter_handler, update_rule_handler,
};

/// Authoring routes, mounted under `/v1` by the binary.
pub fn v1_routes() -> axum::Router<std::sync::Arc<AppState>> {
    use axum::routing::{get, post, put};

    axum::Router::new()
        .route("/policy-authoring/sessions", post(start_session_handler))
        .route(
            "/policy-authoring/sessions/{session_id}",
            get(get_session_handler).delete(discard_session_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/nodes",
            post(add_node_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/nodes/delete",
            post(delete_node_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/nodes/move",
            post(move_node_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/rules",
            put(update_rule_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/groups/operator",
            put(set_group_operator_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/paste",
            post(paste_condition_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/condition",
            put(replace_condition_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/preview",
            get(preview_condition_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/templates",
            put(select_templates_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/parameters",
            put(update_parameter_handler),
        )
        .route(
            "/policy-authoring/sessions/{session_id}/save",
            post(save_policy_handler),
        )
        .route("/policy-templates", get(list_templates_handler))
        .route("/attributes", get(list_attributes_handler))
        .route("/attribute-options", get(list_attribute_options_handler))
        .route("/conditions/normalize", post(normalize_condition_handler))
}
