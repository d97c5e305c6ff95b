pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod test_utils;

use application::{
    command_bus::CommandBus,
    command_handlers::{
        AddConditionNodeCommandHandler, DeleteConditionNodeCommandHandler,
        DiscardSessionCommandHandler, MoveConditionNodeCommandHandler,
        PasteConditionTextCommandHandler, ReplaceConditionCommandHandler, SavePolicyCommandHandler,
        SelectTemplatesCommandHandler, SetGroupOperatorCommandHandler,
        StartAuthoringSessionCommandHandler, UpdateRuleCommandHandler,
        UpdateTemplateParameterCommandHandler,
    },
    commands::{
        AddConditionNodeCommand, DeleteConditionNodeCommand, DiscardSessionCommand,
        MoveConditionNodeCommand, PasteConditionTextCommand, ReplaceConditionCommand,
        SavePolicyCommand, SelectTemplatesCommand, SetGroupOperatorCommand,
        StartAuthoringSessionCommand, UpdateRuleCommand, UpdateTemplateParameterCommand,
    },
    queries::{
        GetSessionQuery, ListAttributeOptionsQuery, ListAttributesQuery, ListTemplatesQuery,
        NormalizeConditionQuery, PreviewConditionQuery,
    },
    query_bus::QueryBus,
    query_handlers::{
        GetSessionQueryHandler, ListAttributeOptionsQueryHandler, ListAttributesQueryHandler,
        ListTemplatesQueryHandler, NormalizeConditionQueryHandler, PreviewConditionQueryHandler,
    },
    services::{ConditionPipeline, TemplateConditionGenerator},
};
use infrastructure::{
    AttributeOptionProvider, CombinationService, HttpPolicyBackend,
    InMemoryAttributeOptionProvider, InMemoryCombinationService, InMemoryPolicyRepository,
    InMemorySessionRepository, InMemoryTemplateCatalog, InfraError, PolicyRepository,
    SessionRepository, TemplateCatalog,
};
use interface::AppState;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Where templates, options, combinations and policies come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// The policy backend's REST API
    Http,
    /// Built-in sample data, for local runs and tests
    #[default]
    Memory,
}

impl std::str::FromStr for BackendMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(BackendMode::Http),
            "memory" => Ok(BackendMode::Memory),
            other => Err(ConfigError::Invalid(format!("BACKEND_MODE={other}"))),
        }
    }
}

/// Application configuration with all environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: String,
    pub backend_mode: BackendMode,
    pub policy_api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub session_idle_ttl_secs: u64,
}

impl AppConfig {
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 1800;

    /// Creates a new AppConfig from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_host = var("HTTP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let http_port = var("HTTP_PORT").unwrap_or_else(|| "8080".to_string());
        http_port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(format!("HTTP_PORT={http_port}")))?;

        let backend_mode = match var("BACKEND_MODE") {
            Some(mode) => mode.parse()?,
            None => BackendMode::default(),
        };

        let policy_api_base_url = var("POLICY_API_BASE_URL");
        if backend_mode == BackendMode::Http && policy_api_base_url.is_none() {
            return Err(ConfigError::MissingRequired("POLICY_API_BASE_URL".to_string()));
        }

        let positive_secs = |key: &str, default: u64| match var(key) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::Invalid(format!("{key}={raw}"))),
            None => Ok(default),
        };
        let request_timeout_secs =
            positive_secs("REQUEST_TIMEOUT_SECS", Self::DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let session_idle_ttl_secs =
            positive_secs("SESSION_IDLE_TTL_SECS", Self::DEFAULT_SESSION_IDLE_TTL_SECS)?;

        Ok(AppConfig {
            http_host,
            http_port,
            backend_mode,
            policy_api_base_url,
            request_timeout_secs,
            session_idle_ttl_secs,
        })
    }

    /// Creates an in-memory AppConfig with custom address (useful for testing)
    pub fn new(http_host: String, http_port: String) -> Self {
        Self {
            http_host,
            http_port,
            backend_mode: BackendMode::Memory,
            policy_api_base_url: None,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            session_idle_ttl_secs: Self::DEFAULT_SESSION_IDLE_TTL_SECS,
        }
    }

    /// Creates the HTTP address string from host and port
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingRequired(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// APPLICATION BUILDER
// ============================================================================

/// Builder for creating application state with better testability
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<AppConfig>,
    template_catalog: Option<Arc<dyn TemplateCatalog + Send + Sync>>,
    option_provider: Option<Arc<dyn AttributeOptionProvider + Send + Sync>>,
    combination_service: Option<Arc<dyn CombinationService + Send + Sync>>,
    policy_repo: Option<Arc<dyn PolicyRepository + Send + Sync>>,
    sessions: Option<Arc<dyn SessionRepository + Send + Sync>>,
}

/// External collaborators wired into the handlers
struct Backends {
    template_catalog: Arc<dyn TemplateCatalog + Send + Sync>,
    option_provider: Arc<dyn AttributeOptionProvider + Send + Sync>,
    combination_service: Arc<dyn CombinationService + Send + Sync>,
    policy_repo: Arc<dyn PolicyRepository + Send + Sync>,
}

impl AppStateBuilder {
    /// Creates a new AppStateBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_template_catalog(mut self, catalog: Arc<dyn TemplateCatalog + Send + Sync>) -> Self {
        self.template_catalog = Some(catalog);
        self
    }

    pub fn with_option_provider(
        mut self,
        provider: Arc<dyn AttributeOptionProvider + Send + Sync>,
    ) -> Self {
        self.option_provider = Some(provider);
        self
    }

    pub fn with_combination_service(
        mut self,
        service: Arc<dyn CombinationService + Send + Sync>,
    ) -> Self {
        self.combination_service = Some(service);
        self
    }

    pub fn with_policy_repository(mut self, repo: Arc<dyn PolicyRepository + Send + Sync>) -> Self {
        self.policy_repo = Some(repo);
        self
    }

    pub fn with_session_repository(mut self, repo: Arc<dyn SessionRepository + Send + Sync>) -> Self {
        self.sessions = Some(repo);
        self
    }

    /// Default backends for the configured mode; explicit overrides win.
    fn resolve_backends(&mut self, config: &AppConfig) -> Result<Backends, AppError> {
        let defaults = match config.backend_mode {
            BackendMode::Http => {
                let base_url = config
                    .policy_api_base_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingRequired("POLICY_API_BASE_URL".to_string()))?;
                let backend = Arc::new(HttpPolicyBackend::new(base_url, config.request_timeout())?);
                Backends {
                    template_catalog: backend.clone(),
                    option_provider: backend.clone(),
                    combination_service: backend.clone(),
                    policy_repo: backend,
                }
            }
            BackendMode::Memory => {
                Backends {
                    template_catalog: Arc::new(InMemoryTemplateCatalog::default()),
                    option_provider: Arc::new(InMemoryAttributeOptionProvider::default()),
                    combination_service: Arc::new(InMemoryCombinationService::default()),
                    policy_repo: Arc::new(InMemoryPolicyRepository::new()),
                }
            }
        };

        Ok(Backends {
            template_catalog: self.template_catalog.take().unwrap_or(defaults.template_catalog),
            option_provider: self.option_provider.take().unwrap_or(defaults.option_provider),
            combination_service: self
                .combination_service
                .take()
                .unwrap_or(defaults.combination_service),
            policy_repo: self.policy_repo.take().unwrap_or(defaults.policy_repo),
        })
    }

    /// Builds the application state
    pub async fn build(mut self) -> Result<Arc<AppState>, AppError> {
        let config = self
            .config
            .take()
            .unwrap_or_else(|| AppConfig::new("127.0.0.1".to_string(), "8080".to_string()));
        let backends = self.resolve_backends(&config)?;
        let sessions = self
            .sessions
            .take()
            .unwrap_or_else(|| {
                Arc::new(InMemorySessionRepository::new().with_idle_ttl(config.session_idle_ttl()))
            });

        // Create services
        let pipeline = ConditionPipeline::default();
        let generator = Arc::new(TemplateConditionGenerator::new(
            backends.combination_service.clone(),
            pipeline.clone(),
        ));

        // Create CQRS buses
        let command_bus = Arc::new(CommandBus::new());
        let query_bus = Arc::new(QueryBus::new());

        Self::register_command_handlers(&command_bus, &sessions, &backends, &generator).await;
        Self::register_query_handlers(&query_bus, &sessions, &backends, &generator, &pipeline).await;

        tracing::info!(mode = ?config.backend_mode, "Application state built");

        Ok(Arc::new(AppState {
            sessions,
            generator,
            command_bus,
            query_bus,
        }))
    }

    /// Registers all command handlers
    async fn register_command_handlers(
        command_bus: &Arc<CommandBus>,
        sessions: &Arc<dyn SessionRepository + Send + Sync>,
        backends: &Backends,
        generator: &Arc<TemplateConditionGenerator>,
    ) {
        command_bus
            .register_handler::<StartAuthoringSessionCommand, _>(
                StartAuthoringSessionCommandHandler::new(
                    sessions.clone(),
                    backends.template_catalog.clone(),
                    backends.policy_repo.clone(),
                    generator.clone(),
                ),
            )
            .await;

        command_bus
            .register_handler::<AddConditionNodeCommand, _>(AddConditionNodeCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<UpdateRuleCommand, _>(UpdateRuleCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<SetGroupOperatorCommand, _>(SetGroupOperatorCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<DeleteConditionNodeCommand, _>(
                DeleteConditionNodeCommandHandler::new(sessions.clone(), generator.clone()),
            )
            .await;

        command_bus
            .register_handler::<MoveConditionNodeCommand, _>(MoveConditionNodeCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<PasteConditionTextCommand, _>(
                PasteConditionTextCommandHandler::new(sessions.clone(), generator.clone()),
            )
            .await;

        command_bus
            .register_handler::<ReplaceConditionCommand, _>(ReplaceConditionCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<SelectTemplatesCommand, _>(SelectTemplatesCommandHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<UpdateTemplateParameterCommand, _>(
                UpdateTemplateParameterCommandHandler::new(sessions.clone(), generator.clone()),
            )
            .await;

        command_bus
            .register_handler::<SavePolicyCommand, _>(SavePolicyCommandHandler::new(
                sessions.clone(),
                backends.policy_repo.clone(),
                generator.clone(),
            ))
            .await;

        command_bus
            .register_handler::<DiscardSessionCommand, _>(DiscardSessionCommandHandler::new(
                sessions.clone(),
            ))
            .await;
    }

    /// Registers all query handlers
    async fn register_query_handlers(
        query_bus: &Arc<QueryBus>,
        sessions: &Arc<dyn SessionRepository + Send + Sync>,
        backends: &Backends,
        generator: &Arc<TemplateConditionGenerator>,
        pipeline: &ConditionPipeline,
    ) {
        query_bus
            .register_handler::<GetSessionQuery, _>(GetSessionQueryHandler::new(
                sessions.clone(),
                generator.clone(),
            ))
            .await;

        query_bus
            .register_handler::<PreviewConditionQuery, _>(PreviewConditionQueryHandler::new(
                sessions.clone(),
                pipeline.clone(),
            ))
            .await;

        query_bus
            .register_handler::<ListTemplatesQuery, _>(ListTemplatesQueryHandler::new(
                backends.template_catalog.clone(),
            ))
            .await;

        query_bus
            .register_handler::<ListAttributesQuery, _>(ListAttributesQueryHandler::new(
                pipeline.clone(),
            ))
            .await;

        query_bus
            .register_handler::<ListAttributeOptionsQuery, _>(
                ListAttributeOptionsQueryHandler::new(
                    backends.option_provider.clone(),
                    pipeline.clone(),
                ),
            )
            .await;

        query_bus
            .register_handler::<NormalizeConditionQuery, _>(NormalizeConditionQueryHandler::new(
                pipeline.clone(),
            ))
            .await;
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Backend error: {0}")]
    Backend(#[from] InfraError),
    #[error("Initialization error: {0}")]
    Initialization(String),
}

// ============================================================================
// TESTING UTILITIES
// ============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use std::collections::HashMap;

    /// Creates a test configuration
    pub fn create_test_config() -> AppConfig {
        AppConfig::new("127.0.0.1".to_string(), "8080".to_string())
    }

    /// Lookup over a fixed set of variables, for config tests that must not touch the process env
    pub fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_new() {
        let config = AppConfig::new("test_host".to_string(), "9000".to_string());

        assert_eq!(config.http_host, "test_host");
        assert_eq!(config.http_port, "9000");
        assert_eq!(config.backend_mode, BackendMode::Memory);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.session_idle_ttl_secs, 1800);
    }

    #[test]
    fn test_app_config_http_address() {
        let config = AppConfig::new("localhost".to_string(), "8080".to_string());
        assert_eq!(config.http_address(), "localhost:8080");
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_lookup(test_helpers::lookup(&[])).unwrap();
        assert_eq!(config, test_helpers::create_test_config());
    }

    #[test]
    fn test_app_config_http_mode() {
        let config = AppConfig::from_lookup(test_helpers::lookup(&[
            ("BACKEND_MODE", "HTTP"),
            ("POLICY_API_BASE_URL", "https://policies.internal/api"),
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("SESSION_IDLE_TTL_SECS", "600"),
            ("HTTP_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(config.backend_mode, BackendMode::Http);
        assert_eq!(
            config.policy_api_base_url.as_deref(),
            Some("https://policies.internal/api")
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.session_idle_ttl(), Duration::from_secs(600));
        assert_eq!(config.http_address(), "127.0.0.1:9090");
    }

    #[test]
    fn test_app_config_http_mode_requires_base_url() {
        let result = AppConfig::from_lookup(test_helpers::lookup(&[("BACKEND_MODE", "http")]));
        assert!(matches!(result, Err(ConfigError::MissingRequired(ref v)) if v == "POLICY_API_BASE_URL"));
    }

    #[test]
    fn test_app_config_rejects_invalid_values() {
        for vars in [
            [("REQUEST_TIMEOUT_SECS", "soon")],
            [("REQUEST_TIMEOUT_SECS", "0")],
            [("SESSION_IDLE_TTL_SECS", "-1")],
            [("BACKEND_MODE", "postgres")],
            [("HTTP_PORT", "eighty")],
        ] {
            let result = AppConfig::from_lookup(test_helpers::lookup(&vars));
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "{vars:?}");
        }
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingRequired("POLICY_API_BASE_URL".to_string());
        assert_eq!(
            error.to_string(),
            "Missing required environment variable: POLICY_API_BASE_URL"
        );

        let error = ConfigError::Invalid("REQUEST_TIMEOUT_SECS=soon".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: REQUEST_TIMEOUT_SECS=soon"
        );
    }

    #[tokio::test]
    async fn test_app_state_builder_memory_mode() {
        let state = AppStateBuilder::new()
            .with_config(test_helpers::create_test_config())
            .build()
            .await
            .unwrap();

        let templates: Vec<crate::domain::template::PolicyTemplate> = state
            .query_bus
            .dispatch(application::queries::QueryFactory::list_templates(None))
            .await
            .unwrap();
        assert!(!templates.is_empty());
    }

    #[tokio::test]
    async fn test_app_state_builder_http_mode_without_url() {
        let mut config = test_helpers::create_test_config();
        config.backend_mode = BackendMode::Http;

        let result = AppStateBuilder::new().with_config(config).build().await;
        assert!(matches!(result, Err(AppError::Config(ConfigError::MissingRequired(_)))));
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::Initialization("listener".to_string());
        assert_eq!(error.to_string(), "Initialization error: listener");
    }
}
