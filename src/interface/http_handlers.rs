use crate::application::command_bus::BusError;
use crate::application::commands::{
    AddConditionNodeCommand, DeleteConditionNodeCommand, DiscardSessionCommand, GenerationReport,
    MoveConditionNodeCommand, NewConditionNode, NodeAdded, PasteConditionTextCommand,
    ReplaceConditionCommand, SavePolicyCommand, SelectTemplatesCommand, SetGroupOperatorCommand,
    StartAuthoringSessionCommand, UpdateRuleCommand, UpdateTemplateParameterCommand,
};
use crate::application::queries::{ConditionPreview, NormalizedCondition, QueryFactory};
use crate::application::services::ConditionError;
use crate::application::session::{RuleUpdate, SessionSnapshot};
use crate::application::validators::ValidationError;
use crate::domain::attribute::{AttributeDefinition, AttributeOption};
use crate::domain::condition::{LogicalOperator, Operator, Rule, RuleValue};
use crate::domain::policy::{PolicyEffect, PolicyRecord};
use crate::domain::template::PolicyTemplate;
use crate::infrastructure::InfraError;
use crate::interface::app_state::AppState;
use crate::interface::{
    AddNodeRequest, AttributeListResponse, AttributeOptionsQueryParams, AttributeOptionsResponse,
    AttributeResponse, DeleteNodeRequest, DiscardSessionResponse, ErrorResponse,
    GenerationResponse, MoveNodeRequest, NodeAddedResponse, NormalizeConditionRequest,
    NormalizeConditionResponse, PasteConditionRequest, PolicyResponse, PreviewQueryParams,
    PreviewResponse, ReplaceConditionRequest, SavePolicyRequest, SelectTemplatesRequest,
    SessionResponse, SetGroupOperatorRequest, StartSessionRequest, TemplateListResponse,
    TemplatesQueryParams, UpdateParameterRequest, UpdateRuleRequest,
};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

fn status_for(err: &ConditionError) -> StatusCode {
    match err {
        ConditionError::Validation(
            ValidationError::NoValidRules | ValidationError::ParametersIncomplete(_),
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        ConditionError::Validation(_)
        | ConditionError::Session(_)
        | ConditionError::Unparseable(_)
        | ConditionError::UnknownTemplate(_) => StatusCode::BAD_REQUEST,
        ConditionError::NoTemplatesSelected => StatusCode::UNPROCESSABLE_ENTITY,
        ConditionError::EmptyCombination => StatusCode::CONFLICT,
        ConditionError::SessionNotFound(_)
        | ConditionError::PolicyNotFound(_)
        | ConditionError::Backend(InfraError::NotFound(_)) => StatusCode::NOT_FOUND,
        ConditionError::Backend(_) | ConditionError::Combination(_) => StatusCode::BAD_GATEWAY,
        ConditionError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Maps a bus failure to a JSON error body with a status derived from the handler's error.
fn error_response(err: BusError) -> Response {
    let status = err
        .downcast_ref::<ConditionError>()
        .map(status_for)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn parse_operator(raw: Option<&str>) -> Result<Option<Operator>, Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(code) => code.parse::<Operator>().map(Some).map_err(bad_request),
        None => Ok(None),
    }
}

fn parse_group_operator(raw: Option<&str>) -> Result<LogicalOperator, Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(code) => code.parse::<LogicalOperator>().map_err(bad_request),
        None => Ok(LogicalOperator::And),
    }
}

// --- SESSION HANDLERS ---

#[axum::debug_handler]
#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = SessionResponse),
        (status = 404, description = "Policy not found", body = ErrorResponse),
        (status = 502, description = "Policy backend unavailable", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Open an authoring session for an action. When policy_id is given, the persisted conditions are normalized into the session."
)]
pub async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartSessionRequest>,
) -> Response {
    let cmd = StartAuthoringSessionCommand {
        action_code: payload.action_code,
        policy_id: payload.policy_id,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => (StatusCode::CREATED, Json(SessionResponse::from(snapshot))).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/policy-authoring/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Authoring session id")),
    responses(
        (status = 200, description = "Session state", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Current condition tree, template selection and parameter status of a session."
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state
        .query_bus
        .dispatch::<_, SessionSnapshot>(QueryFactory::get_session(session_id))
        .await
    {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/policy-authoring/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Authoring session id")),
    responses(
        (status = 200, description = "Session discarded", body = DiscardSessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Discard an authoring session without saving."
)]
pub async fn discard_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state
        .command_bus
        .dispatch::<_, ()>(DiscardSessionCommand { session_id })
        .await
    {
        Ok(()) => Json(DiscardSessionResponse { success: true }).into_response(),
        Err(e) => error_response(e),
    }
}

// --- TREE EDITING HANDLERS ---

#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions/{session_id}/nodes",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = AddNodeRequest,
    responses(
        (status = 201, description = "Node added", body = NodeAddedResponse),
        (status = 400, description = "Invalid path, kind or operator", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Append a rule or group under the group at parent_path. The rule value is coerced against the attribute catalog."
)]
pub async fn add_node_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<AddNodeRequest>,
) -> Response {
    let node = match payload.kind.trim().to_ascii_lowercase().as_str() {
        "rule" => {
            let operator = match parse_operator(payload.operator.as_deref()) {
                Ok(op) => op,
                Err(resp) => return resp,
            };
            NewConditionNode::Rule(Rule {
                field: payload.field.unwrap_or_default(),
                operator,
                value: payload
                    .value
                    .as_ref()
                    .map(RuleValue::from_json)
                    .unwrap_or_default(),
            })
        }
        "group" => match parse_group_operator(payload.group_operator.as_deref()) {
            Ok(op) => NewConditionNode::Group(op),
            Err(resp) => return resp,
        },
        other => return bad_request(format!("unknown node kind: {other}")),
    };

    let cmd = AddConditionNodeCommand {
        session_id,
        parent_path: payload.parent_path,
        node,
    };
    match state.command_bus.dispatch::<_, NodeAdded>(cmd).await {
        Ok(added) => (StatusCode::CREATED, Json(NodeAddedResponse::from(added))).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions/{session_id}/nodes/delete",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = DeleteNodeRequest,
    responses(
        (status = 200, description = "Node deleted", body = SessionResponse),
        (status = 400, description = "Invalid path or root deletion", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Delete the node at path. The root group cannot be deleted."
)]
pub async fn delete_node_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<DeleteNodeRequest>,
) -> Response {
    let cmd = DeleteConditionNodeCommand {
        session_id,
        path: payload.path,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions/{session_id}/nodes/move",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = MoveNodeRequest,
    responses(
        (status = 200, description = "Node moved", body = SessionResponse),
        (status = 400, description = "Invalid path or index", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Reorder a child within its group."
)]
pub async fn move_node_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<MoveNodeRequest>,
) -> Response {
    let cmd = MoveConditionNodeCommand {
        session_id,
        parent_path: payload.parent_path,
        from: payload.from,
        to: payload.to,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    put,
    path = "/v1/policy-authoring/sessions/{session_id}/rules",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Rule updated", body = SessionResponse),
        (status = 400, description = "Invalid path or operator", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Edit the field, operator or value of the rule at path. Omitted members are left unchanged."
)]
pub async fn update_rule_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateRuleRequest>,
) -> Response {
    let operator = match parse_operator(payload.operator.as_deref()) {
        Ok(op) => op,
        Err(resp) => return resp,
    };
    let cmd = UpdateRuleCommand {
        session_id,
        path: payload.path,
        update: RuleUpdate {
            field: payload.field,
            operator,
            value: payload.value,
        },
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    put,
    path = "/v1/policy-authoring/sessions/{session_id}/groups/operator",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = SetGroupOperatorRequest,
    responses(
        (status = 200, description = "Group operator set", body = SessionResponse),
        (status = 400, description = "Invalid path or operator", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Switch the group at path between and / or."
)]
pub async fn set_group_operator_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SetGroupOperatorRequest>,
) -> Response {
    let operator = match payload.operator.parse::<LogicalOperator>() {
        Ok(op) => op,
        Err(e) => return bad_request(e),
    };
    let cmd = SetGroupOperatorCommand {
        session_id,
        path: payload.path,
        operator,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions/{session_id}/paste",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = PasteConditionRequest,
    responses(
        (status = 200, description = "Pasted condition adopted", body = SessionResponse),
        (status = 400, description = "Text is not a condition", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Replace the condition with pasted JSON text. Rejected text leaves the tree untouched."
)]
pub async fn paste_condition_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<PasteConditionRequest>,
) -> Response {
    let cmd = PasteConditionTextCommand {
        session_id,
        text: payload.text,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    put,
    path = "/v1/policy-authoring/sessions/{session_id}/condition",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = ReplaceConditionRequest,
    responses(
        (status = 200, description = "Condition replaced", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Replace the whole condition with a loosely shaped tree; it is normalized before use."
)]
pub async fn replace_condition_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<ReplaceConditionRequest>,
) -> Response {
    let cmd = ReplaceConditionCommand {
        session_id,
        condition: payload.condition,
    };
    match state.command_bus.dispatch::<_, SessionSnapshot>(cmd).await {
        Ok(snapshot) => Json(SessionResponse::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/policy-authoring/sessions/{session_id}/preview",
    params(
        ("session_id" = String, Path, description = "Authoring session id"),
        PreviewQueryParams
    ),
    responses(
        (status = 200, description = "Condition text as it would be submitted", body = PreviewResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Authoring"],
    description = "Render the pruned condition as JSON text."
)]
pub async fn preview_condition_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(params): Query<PreviewQueryParams>,
) -> Response {
    match state
        .query_bus
        .dispatch::<_, ConditionPreview>(QueryFactory::preview_condition(session_id, params.pretty))
        .await
    {
        Ok(preview) => Json(PreviewResponse::from(preview)).into_response(),
        Err(e) => error_response(e),
    }
}

// --- TEMPLATE HANDLERS ---

#[utoipa::path(
    put,
    path = "/v1/policy-authoring/sessions/{session_id}/templates",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = SelectTemplatesRequest,
    responses(
        (status = 200, description = "Selection applied; see status for the generation result", body = GenerationResponse),
        (status = 400, description = "Template not available for the action", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Templates"],
    description = "Select policy templates. Parameters are seeded from defaults and the condition is regenerated when they are complete."
)]
pub async fn select_templates_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SelectTemplatesRequest>,
) -> Response {
    let cmd = SelectTemplatesCommand {
        session_id,
        template_ids: payload.template_ids,
    };
    match state.command_bus.dispatch::<_, GenerationReport>(cmd).await {
        Ok(report) => Json(GenerationResponse::from(report)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    put,
    path = "/v1/policy-authoring/sessions/{session_id}/parameters",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = UpdateParameterRequest,
    responses(
        (status = 200, description = "Parameter stored; see status for the generation result", body = GenerationResponse),
        (status = 400, description = "Template not selected", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    ),
    tags = ["Templates"],
    description = "Edit one template parameter and regenerate the condition. Responses to superseded edits are discarded."
)]
pub async fn update_parameter_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateParameterRequest>,
) -> Response {
    let cmd = UpdateTemplateParameterCommand {
        session_id,
        template_id: payload.template_id,
        key: payload.key,
        value: payload.value,
    };
    match state.command_bus.dispatch::<_, GenerationReport>(cmd).await {
        Ok(report) => Json(GenerationResponse::from(report)).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/policy-templates",
    params(TemplatesQueryParams),
    responses(
        (status = 200, description = "Templates for the action", body = TemplateListResponse),
        (status = 502, description = "Policy backend unavailable", body = ErrorResponse),
    ),
    tags = ["Templates"],
    description = "List policy templates, optionally filtered by action code."
)]
pub async fn list_templates_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TemplatesQueryParams>,
) -> Response {
    match state
        .query_bus
        .dispatch::<_, Vec<PolicyTemplate>>(QueryFactory::list_templates(params.action_code))
        .await
    {
        Ok(templates) => Json(TemplateListResponse { templates }).into_response(),
        Err(e) => error_response(e),
    }
}

// --- POLICY HANDLERS ---

#[utoipa::path(
    post,
    path = "/v1/policy-authoring/sessions/{session_id}/save",
    params(("session_id" = String, Path, description = "Authoring session id")),
    request_body = SavePolicyRequest,
    responses(
        (status = 200, description = "Policy saved", body = PolicyResponse),
        (status = 400, description = "Invalid name, effect or priority", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 422, description = "Condition has no complete rule", body = ErrorResponse),
        (status = 502, description = "Policy backend unavailable", body = ErrorResponse),
    ),
    tags = ["Policies"],
    description = "Persist the session's pruned condition. Creates the policy on first save and updates it afterwards."
)]
pub async fn save_policy_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SavePolicyRequest>,
) -> Response {
    let effect = match payload.effect.as_deref() {
        Some(raw) => match raw.parse::<PolicyEffect>() {
            Ok(effect) => effect,
            Err(e) => return bad_request(e),
        },
        None => PolicyEffect::Allow,
    };
    let cmd = SavePolicyCommand {
        session_id,
        name: payload.name,
        description: payload.description,
        effect,
        priority: payload.priority,
    };
    match state.command_bus.dispatch::<_, PolicyRecord>(cmd).await {
        Ok(record) => Json(PolicyResponse::from(record)).into_response(),
        Err(e) => error_response(e),
    }
}

// --- VOCABULARY HANDLERS ---

#[utoipa::path(
    get,
    path = "/v1/attributes",
    responses((status = 200, description = "Attribute vocabulary", body = AttributeListResponse)),
    tags = ["Attributes"],
    description = "List attributes with their value type and legal operators."
)]
pub async fn list_attributes_handler(State(state): State<Arc<AppState>>) -> Response {
    match state
        .query_bus
        .dispatch::<_, Vec<AttributeDefinition>>(QueryFactory::list_attributes())
        .await
    {
        Ok(attributes) => Json(AttributeListResponse {
            attributes: attributes.into_iter().map(AttributeResponse::from).collect(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/attribute-options",
    params(AttributeOptionsQueryParams),
    responses(
        (status = 200, description = "Options keyed by attribute", body = AttributeOptionsResponse),
        (status = 400, description = "Unknown attribute key", body = ErrorResponse),
        (status = 502, description = "Policy backend unavailable", body = ErrorResponse),
    ),
    tags = ["Attributes"],
    description = "Load selectable values for several attributes at once."
)]
pub async fn list_attribute_options_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AttributeOptionsQueryParams>,
) -> Response {
    match state
        .query_bus
        .dispatch::<_, BTreeMap<String, Vec<AttributeOption>>>(QueryFactory::list_attribute_options(
            &params.keys,
        ))
        .await
    {
        Ok(options) => Json(AttributeOptionsResponse { options }).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/conditions/normalize",
    request_body = NormalizeConditionRequest,
    responses(
        (status = 200, description = "Normalized, expanded, coerced and pruned condition", body = NormalizeConditionResponse),
        (status = 400, description = "Text is not a condition", body = ErrorResponse),
    ),
    tags = ["Attributes"],
    description = "Run a condition through the full pipeline without a session."
)]
pub async fn normalize_condition_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NormalizeConditionRequest>,
) -> Response {
    match state
        .query_bus
        .dispatch::<_, NormalizedCondition>(QueryFactory::normalize_condition(payload.condition))
        .await
    {
        Ok(normalized) => Json(NormalizeConditionResponse::from(normalized)).into_response(),
        Err(e) => error_response(e),
    }
}
