use axum::Router;
use dotenvy::dotenv;
use policy_condition_service::interface::{
    // DTOs
    AddNodeRequest,
    AttributeListResponse,
    AttributeOptionsResponse,
    AttributeResponse,
    DeleteNodeRequest,
    DiscardSessionResponse,
    ErrorResponse,
    GenerationResponse,
    MoveNodeRequest,
    NodeAddedResponse,
    NormalizeConditionRequest,
    NormalizeConditionResponse,
    ParameterStatusResponse,
    PasteConditionRequest,
    PolicyResponse,
    PreviewResponse,
    ReplaceConditionRequest,
    SavePolicyRequest,
    SelectTemplatesRequest,
    SessionResponse,
    SetGroupOperatorRequest,
    StartSessionRequest,
    TemplateListResponse,
    UpdateParameterRequest,
    UpdateRuleRequest,
    v1_routes,
};
use policy_condition_service::{AppConfig, AppError, AppStateBuilder};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        policy_condition_service::interface::http_handlers::start_session_handler,
        policy_condition_service::interface::http_handlers::get_session_handler,
        policy_condition_service::interface::http_handlers::discard_session_handler,
        policy_condition_service::interface::http_handlers::add_node_handler,
        policy_condition_service::interface::http_handlers::delete_node_handler,
        policy_condition_service::interface::http_handlers::move_node_handler,
        policy_condition_service::interface::http_handlers::update_rule_handler,
        policy_condition_service::interface::http_handlers::set_group_operator_handler,
        policy_condition_service::interface::http_handlers::paste_condition_handler,
        policy_condition_service::interface::http_handlers::replace_condition_handler,
        policy_condition_service::interface::http_handlers::preview_condition_handler,
        policy_condition_service::interface::http_handlers::select_templates_handler,
        policy_condition_service::interface::http_handlers::update_parameter_handler,
        policy_condition_service::interface::http_handlers::list_templates_handler,
        policy_condition_service::interface::http_handlers::save_policy_handler,
        policy_condition_service::interface::http_handlers::list_attributes_handler,
        policy_condition_service::interface::http_handlers::list_attribute_options_handler,
        policy_condition_service::interface::http_handlers::normalize_condition_handler,
    ),
    components(schemas(
        StartSessionRequest, SessionResponse, ParameterStatusResponse, DiscardSessionResponse, AddNodeRequest, NodeAddedResponse, DeleteNodeRequest, MoveNodeRequest, UpdateRuleRequest, SetGroupOperatorRequest, PasteConditionRequest, ReplaceConditionRequest, PreviewResponse, SelectTemplatesRequest, UpdateParameterRequest, GenerationResponse, TemplateListResponse, SavePolicyRequest, PolicyResponse, AttributeResponse, AttributeListResponse, AttributeOptionsResponse, NormalizeConditionRequest, NormalizeConditionResponse, ErrorResponse
    )),
    tags(
        (name = "Authoring", description = "Condition tree authoring sessions"),
        (name = "Templates", description = "Template selection and condition generation"),
        (name = "Policies", description = "Policy persistence"),
        (name = "Attributes", description = "Attribute vocabulary and condition normalization")
    )
)]
pub struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse environment variables
    let config = AppConfig::from_env()?;

    // Setup application state
    let app_state = AppStateBuilder::new()
        .with_config(config.clone())
        .build()
        .await?;

    // Create HTTP address
    let http_addr = config.http_address();

    // Create OpenAPI documentation
    let openapi = ApiDoc::openapi();

    let app = Router::new()
        .nest("/v1", v1_routes())
        .merge(SwaggerUi::new("/swagger").url("/openapi.json", openapi.clone()))
        .with_state(app_state);

    let listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|e| AppError::Initialization(format!("failed to bind {http_addr}: {e}")))?;
    tracing::info!(address = %http_addr, mode = ?config.backend_mode, "HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Initialization(format!("server error: {e}")))
}
