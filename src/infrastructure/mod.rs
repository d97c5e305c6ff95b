use crate::application::session::AuthoringSession;
use crate::domain::attribute::{AttributeOption, OptionSource};
use crate::domain::policy::{PolicyPayload, PolicyRecord};
use crate::domain::template::{CombinationRequest, CombinationResponse, PolicyTemplate};
use async_trait::async_trait;
use std::sync::Arc;

// Infrastructure layer: policy backend, external services, adapters
pub mod http_backend;
pub mod in_memory;

pub use http_backend::HttpPolicyBackend;
pub use in_memory::{
    InMemoryAttributeOptionProvider, InMemoryCombinationService, InMemoryPolicyRepository,
    InMemorySessionRepository, InMemoryTemplateCatalog,
};

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub type RepoResult<T> = Result<T, InfraError>;

/// Session state is owned by one editor; the mutex only serializes that editor's requests.
pub type SharedSession = Arc<tokio::sync::Mutex<AuthoringSession>>;

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn list_templates(&self, action_code: Option<&str>) -> RepoResult<Vec<PolicyTemplate>>;
}

#[async_trait]
pub trait AttributeOptionProvider: Send + Sync {
    async fn list_options(&self, source: OptionSource) -> RepoResult<Vec<AttributeOption>>;
}

#[async_trait]
pub trait CombinationService: Send + Sync {
    async fn combine(&self, request: &CombinationRequest) -> RepoResult<CombinationResponse>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_policy(&self, policy_id: &str) -> RepoResult<Option<PolicyRecord>>;
    async fn create_policy(&self, payload: &PolicyPayload) -> RepoResult<PolicyRecord>;
    async fn update_policy(&self, policy_id: &str, payload: &PolicyPayload) -> RepoResult<PolicyRecord>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: AuthoringSession) -> RepoResult<SharedSession>;
    async fn get(&self, session_id: &str) -> RepoResult<Option<SharedSession>>;
    async fn remove(&self, session_id: &str) -> RepoResult<bool>;
}
