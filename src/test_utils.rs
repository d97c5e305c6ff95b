use crate::application::command_bus::CommandBus;
use crate::application::commands::StartAuthoringSessionCommand;
use crate::application::query_bus::QueryBus;
use crate::application::session::SessionSnapshot;
use crate::domain::policy::{PolicyEffect, PolicyRecord};
use crate::domain::template::{CombinationRequest, CombinationResponse};
use crate::infrastructure::{
    CombinationService, InMemoryCombinationService, InMemoryPolicyRepository, InfraError,
    RepoResult,
};
use crate::interface::app_state::AppState;
use crate::{AppConfig, AppStateBuilder};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Test backends shared with the app state, so tests can inspect them
pub struct TestBackends {
    pub combination: Arc<InMemoryCombinationService>,
    pub policies: Arc<InMemoryPolicyRepository>,
}

/// Creates an application state on the in-memory backends
pub async fn create_test_app_state() -> Arc<AppState> {
    create_test_app_state_with_backends().await.0
}

/// Same as [`create_test_app_state`], also returning the combination service and policy store
pub async fn create_test_app_state_with_backends() -> (Arc<AppState>, TestBackends) {
    let combination = Arc::new(InMemoryCombinationService::default());
    let policies = Arc::new(InMemoryPolicyRepository::new());
    let state = create_test_app_state_with(combination.clone(), policies.clone()).await;
    (state, TestBackends { combination, policies })
}

/// Creates an application state with a custom combination service
pub async fn create_test_app_state_with(
    combination: Arc<dyn CombinationService + Send + Sync>,
    policies: Arc<InMemoryPolicyRepository>,
) -> Arc<AppState> {
    match AppStateBuilder::new()
        .with_config(AppConfig::new("127.0.0.1".to_string(), "0".to_string()))
        .with_combination_service(combination)
        .with_policy_repository(policies)
        .build()
        .await
    {
        Ok(state) => state,
        Err(e) => panic!("in-memory app state must build: {e}"),
    }
}

/// Opens a session through the command bus
pub async fn start_session(command_bus: &CommandBus, action_code: Option<&str>) -> SessionSnapshot {
    command_bus
        .dispatch::<_, SessionSnapshot>(StartAuthoringSessionCommand {
            action_code: action_code.map(str::to_string),
            policy_id: None,
        })
        .await
        .unwrap_or_else(|e| panic!("session must start: {e}"))
}

/// Reads a session snapshot through the query bus
pub async fn get_session(query_bus: &QueryBus, session_id: &str) -> SessionSnapshot {
    query_bus
        .dispatch::<_, SessionSnapshot>(crate::application::queries::QueryFactory::get_session(
            session_id.to_string(),
        ))
        .await
        .unwrap_or_else(|e| panic!("session must exist: {e}"))
}

/// Policy as stored by older clients: access rules hidden in the legacy wrapper,
/// numbers as strings
pub fn create_legacy_policy_record(id: &str) -> PolicyRecord {
    PolicyRecord {
        id: id.to_string(),
        name: "Legacy approval".to_string(),
        description: None,
        action_code: Some("expense.approve".to_string()),
        effect: PolicyEffect::Allow,
        priority: 10,
        template_ids: vec![4],
        conditions: legacy_condition_json(),
    }
}

pub fn legacy_condition_json() -> Value {
    json!({
        "operator": "and",
        "rules": [
            {
                "field": "user.access_restriction",
                "operator": "and",
                "rules": [
                    {"field": "user.department_id", "operator": "in", "value": ["3", "5"]},
                    {"field": "user.system_level", "operator": "gte", "value": ["2"]}
                ]
            },
            {"field": "data.amount", "operator": "lte", "value": "500000"}
        ]
    })
}

/// Combination service whose first call blocks until released, so a later
/// request can overtake it.
pub struct GatedCombinationService {
    inner: InMemoryCombinationService,
    calls: AtomicUsize,
    pub first_call_started: Notify,
    pub release_first_call: Notify,
}

impl Default for GatedCombinationService {
    fn default() -> Self {
        Self {
            inner: InMemoryCombinationService::default(),
            calls: AtomicUsize::new(0),
            first_call_started: Notify::new(),
            release_first_call: Notify::new(),
        }
    }
}

#[async_trait]
impl CombinationService for GatedCombinationService {
    async fn combine(&self, request: &CombinationRequest) -> RepoResult<CombinationResponse> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first_call_started.notify_one();
            self.release_first_call.notified().await;
        }
        self.inner.combine(request).await
    }
}

/// Combination service that always fails, as an unreachable backend would
pub struct FailingCombinationService;

#[async_trait]
impl CombinationService for FailingCombinationService {
    async fn combine(&self, _request: &CombinationRequest) -> RepoResult<CombinationResponse> {
        Err(InfraError::Status {
            status: 503,
            body: "combination backend unavailable".to_string(),
        })
    }
}
