use super::{
    AttributeOptionProvider, CombinationService, InfraError, PolicyRepository, RepoResult,
    SessionRepository, SharedSession, TemplateCatalog,
};
use crate::application::session::AuthoringSession;
use crate::domain::attribute::{AttributeOption, OptionSource};
use crate::domain::condition::{ACCESS_RESTRICTION_FIELD, Operator};
use crate::domain::policy::{PolicyPayload, PolicyRecord};
use crate::domain::template::{
    CombinationRequest, CombinationResponse, ConditionRuleHint, ParamInputKind, ParamSpec,
    PolicyTemplate, TemplateId, TemplateParameters, parameter_wire_key,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

// ============================================================================
// TEMPLATE CATALOG
// ============================================================================

pub struct InMemoryTemplateCatalog {
    templates: Vec<PolicyTemplate>,
    actions: HashMap<String, Vec<TemplateId>>, // action_code -> template ids
}

impl InMemoryTemplateCatalog {
    pub fn new(templates: Vec<PolicyTemplate>) -> Self {
        Self {
            templates,
            actions: HashMap::new(),
        }
    }

    /// Restricts an action code to a subset of templates.
    pub fn with_action(mut self, action_code: &str, template_ids: Vec<TemplateId>) -> Self {
        self.actions.insert(action_code.to_string(), template_ids);
        self
    }
}

impl Default for InMemoryTemplateCatalog {
    fn default() -> Self {
        Self::new(sample_templates())
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn list_templates(&self, action_code: Option<&str>) -> RepoResult<Vec<PolicyTemplate>> {
        let allowed = action_code.and_then(|code| self.actions.get(code));
        Ok(self
            .templates
            .iter()
            .filter(|t| allowed.is_none_or(|ids| ids.contains(&t.id)))
            .cloned()
            .collect())
    }
}

// ============================================================================
// ATTRIBUTE OPTIONS
// ============================================================================

pub struct InMemoryAttributeOptionProvider {
    options: HashMap<OptionSource, Vec<AttributeOption>>,
}

impl InMemoryAttributeOptionProvider {
    pub fn new(options: HashMap<OptionSource, Vec<AttributeOption>>) -> Self {
        Self { options }
    }
}

impl Default for InMemoryAttributeOptionProvider {
    fn default() -> Self {
        Self::new(sample_options())
    }
}

#[async_trait]
impl AttributeOptionProvider for InMemoryAttributeOptionProvider {
    async fn list_options(&self, source: OptionSource) -> RepoResult<Vec<AttributeOption>> {
        Ok(self.options.get(&source).cloned().unwrap_or_default())
    }
}

// ============================================================================
// COMBINATION SERVICE
// ============================================================================

/// Reference combination for the sample templates, used in memory mode.
pub struct InMemoryCombinationService {
    templates: Vec<PolicyTemplate>,
    calls: AtomicUsize,
}

impl InMemoryCombinationService {
    pub fn new(templates: Vec<PolicyTemplate>) -> Self {
        Self {
            templates,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryCombinationService {
    fn default() -> Self {
        Self::new(sample_templates())
    }
}

#[async_trait]
impl CombinationService for InMemoryCombinationService {
    #[instrument(skip(self, request), fields(templates = ?request.template_ids))]
    async fn combine(&self, request: &CombinationRequest) -> RepoResult<CombinationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut rules = vec![];
        for id in &request.template_ids {
            let template = self
                .templates
                .iter()
                .find(|t| t.id == *id)
                .ok_or_else(|| InfraError::NotFound(format!("template {id}")))?;
            let param = |key: &str| {
                request
                    .parameters
                    .get(&parameter_wire_key(*id, key))
                    .cloned()
            };

            let fragment = match template.template_code.as_str() {
                "amount_limit_restriction" => json!({
                    "field": "data.amount",
                    "operator": param("restriction_type").unwrap_or(json!("lte")),
                    "value": param("amount_limit").unwrap_or(Value::Null),
                }),
                "department_restriction" => json!({
                    "field": "user.department_id",
                    "operator": param("restriction_type").unwrap_or(json!("in")),
                    "value": param("department_ids").unwrap_or(json!([])),
                }),
                "time_restriction" => {
                    let mut window = vec![
                        json!({"field": "environment.time", "operator": "gte", "value": param("start_time")}),
                        json!({"field": "environment.time", "operator": "lte", "value": param("end_time")}),
                    ];
                    if let Some(date) = param("effective_date") {
                        window.push(json!({"field": "environment.date", "operator": "gte", "value": date}));
                    }
                    json!({"operator": "and", "rules": window})
                }
                // Access conditions still come back in the legacy wrapped shape.
                "user_access_restriction" => json!({
                    "field": ACCESS_RESTRICTION_FIELD,
                    "operator": "and",
                    "rules": [param("access_condition").unwrap_or(json!({"operator": "and", "rules": []}))],
                }),
                other => {
                    return Err(InfraError::Other(format!("unsupported template code: {other}")));
                }
            };
            rules.push(fragment);
        }

        debug!(fragments = rules.len(), "Combined template fragments");
        Ok(CombinationResponse {
            condition: json!({"operator": request.operator, "rules": rules}),
        })
    }
}

// ============================================================================
// POLICY REPOSITORY
// ============================================================================

pub struct InMemoryPolicyRepository {
    pub policies: RwLock<HashMap<String, PolicyRecord>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_record(&self, record: PolicyRecord) {
        self.policies.write().await.insert(record.id.clone(), record);
    }
}

impl Default for InMemoryPolicyRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn record_from_payload(id: String, payload: &PolicyPayload) -> PolicyRecord {
    PolicyRecord {
        id,
        name: payload.name.clone(),
        description: payload.description.clone(),
        action_code: payload.action_code.clone(),
        effect: payload.effect,
        priority: payload.priority,
        template_ids: payload.template_ids.clone(),
        conditions: payload.conditions.to_json(),
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn get_policy(&self, policy_id: &str) -> RepoResult<Option<PolicyRecord>> {
        Ok(self.policies.read().await.get(policy_id).cloned())
    }

    async fn create_policy(&self, payload: &PolicyPayload) -> RepoResult<PolicyRecord> {
        let record = record_from_payload(uuid::Uuid::new_v4().to_string(), payload);
        self.policies
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_policy(&self, policy_id: &str, payload: &PolicyPayload) -> RepoResult<PolicyRecord> {
        let mut policies = self.policies.write().await;
        let existing = policies
            .get_mut(policy_id)
            .ok_or_else(|| InfraError::NotFound(format!("policy {policy_id}")))?;
        *existing = record_from_payload(policy_id.to_string(), payload);
        Ok(existing.clone())
    }
}

// ============================================================================
// SESSION REPOSITORY
// ============================================================================

pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, SharedSession>>,
    idle_ttl: Option<chrono::Duration>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl: None,
        }
    }

    /// Sessions untouched for longer than `ttl` are dropped on the next insert.
    pub fn with_idle_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.idle_ttl = chrono::Duration::from_std(ttl).ok();
        self
    }

    // Sessions locked by an in-flight request are in use and kept.
    fn evict_idle(&self, sessions: &mut HashMap<String, SharedSession>) {
        let Some(ttl) = self.idle_ttl else {
            return;
        };
        let cutoff = chrono::Utc::now() - ttl;
        let before = sessions.len();
        sessions.retain(|_, session| {
            session
                .try_lock()
                .map(|s| s.updated_at >= cutoff)
                .unwrap_or(true)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "Evicted idle authoring sessions");
        }
    }
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: AuthoringSession) -> RepoResult<SharedSession> {
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().await;
        self.evict_idle(&mut sessions);
        sessions.insert(id, shared.clone());
        Ok(shared)
    }

    async fn get(&self, session_id: &str) -> RepoResult<Option<SharedSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn remove(&self, session_id: &str) -> RepoResult<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

// ============================================================================
// SAMPLE DATA
// ============================================================================

pub fn sample_templates() -> Vec<PolicyTemplate> {
    let comparison = |default: &str| {
        ParamSpec::new(ParamInputKind::Select, "Comparison")
            .required()
            .with_default(json!(default))
    };

    let mut amount = BTreeMap::new();
    amount.insert(
        "restriction_type".to_string(),
        comparison("lte").with_options(vec![
            (json!("lt"), "Below"),
            (json!("lte"), "At most"),
            (json!("gt"), "Above"),
            (json!("gte"), "At least"),
        ]),
    );
    amount.insert(
        "amount_limit".to_string(),
        ParamSpec::new(ParamInputKind::Number, "Amount limit").required(),
    );

    let mut department = BTreeMap::new();
    department.insert(
        "restriction_type".to_string(),
        comparison("in").with_options(vec![
            (json!("in"), "Only these departments"),
            (json!("not_in"), "All but these departments"),
        ]),
    );
    department.insert(
        "department_ids".to_string(),
        ParamSpec::new(ParamInputKind::DepartmentSelection, "Departments"),
    );

    let mut time = BTreeMap::new();
    time.insert(
        "start_time".to_string(),
        ParamSpec::new(ParamInputKind::Text, "From").required().with_default(json!("09:00")),
    );
    time.insert(
        "end_time".to_string(),
        ParamSpec::new(ParamInputKind::Text, "Until").required().with_default(json!("18:00")),
    );
    time.insert(
        "effective_date".to_string(),
        ParamSpec::new(ParamInputKind::Date, "Effective from"),
    );

    let mut access = BTreeMap::new();
    access.insert(
        "access_condition".to_string(),
        ParamSpec::new(ParamInputKind::ConditionBuilder, "Who may act")
            .required()
            .with_vocabulary(
                &["user.department_id", "user.position_id", "user.system_level", "user.role_id", "user.id"],
                &[Operator::Eq, Operator::Ne, Operator::In, Operator::NotIn, Operator::Gte, Operator::Lte],
            ),
    );

    let template = |id, code: &str, name: &str, field: Option<&str>, values| PolicyTemplate {
        id,
        template_code: code.to_string(),
        name: name.to_string(),
        condition_rule: ConditionRuleHint {
            field: field.map(str::to_string),
        },
        parameters: TemplateParameters {
            configurable_values: values,
        },
    };

    vec![
        template(1, "amount_limit_restriction", "Amount limit", Some("data.amount"), amount),
        template(2, "department_restriction", "Department restriction", Some("user.department_id"), department),
        template(3, "time_restriction", "Office hours", Some("environment.time"), time),
        template(4, "user_access_restriction", "User access", None, access),
    ]
}

fn options(pairs: &[(i64, &str)]) -> Vec<AttributeOption> {
    pairs
        .iter()
        .map(|(value, label)| AttributeOption {
            value: json!(value),
            label: label.to_string(),
        })
        .collect()
}

pub fn sample_options() -> HashMap<OptionSource, Vec<AttributeOption>> {
    let mut map = HashMap::new();
    map.insert(
        OptionSource::Departments,
        options(&[(1, "Finance"), (2, "Sales"), (3, "Engineering"), (4, "Operations"), (5, "Legal")]),
    );
    map.insert(
        OptionSource::Positions,
        options(&[(1, "Staff"), (2, "Team lead"), (3, "Manager"), (4, "Director")]),
    );
    map.insert(
        OptionSource::SystemLevels,
        options(&[(1, "Basic"), (2, "Elevated"), (3, "Administrator")]),
    );
    map.insert(
        OptionSource::Roles,
        options(&[(1, "Requester"), (2, "Approver"), (3, "Auditor")]),
    );
    map.insert(
        OptionSource::Users,
        options(&[(1, "Ana Ito"), (2, "Ben Osei"), (3, "Chen Wu")]),
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::LogicalOperator;

    #[tokio::test]
    async fn test_idle_sessions_are_evicted_on_insert() {
        let repo = InMemorySessionRepository::new().with_idle_ttl(std::time::Duration::from_secs(60));
        let stale = repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();
        let busy = repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();
        let recent = repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();

        let idle_since = chrono::Utc::now() - chrono::Duration::minutes(5);
        let stale_id = {
            let mut session = stale.lock().await;
            session.updated_at = idle_since;
            session.id.clone()
        };
        let mut in_flight = busy.lock().await;
        in_flight.updated_at = idle_since;
        let busy_id = in_flight.id.clone();
        let recent_id = recent.lock().await.id.clone();

        repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();
        drop(in_flight);

        assert!(repo.get(&stale_id).await.unwrap().is_none());
        assert!(repo.get(&busy_id).await.unwrap().is_some());
        assert!(repo.get(&recent_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sessions_are_kept_without_ttl() {
        let repo = InMemorySessionRepository::new();
        let old = repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();
        let old_id = {
            let mut session = old.lock().await;
            session.updated_at = chrono::Utc::now() - chrono::Duration::days(30);
            session.id.clone()
        };
        repo.insert(AuthoringSession::new(None, vec![])).await.unwrap();
        assert!(repo.get(&old_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_template_catalog_filters_by_action() {
        let catalog = InMemoryTemplateCatalog::default().with_action("expense.approve", vec![1, 2]);
        let scoped = catalog.list_templates(Some("expense.approve")).await.unwrap();
        assert_eq!(scoped.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        let all = catalog.list_templates(Some("unknown.action")).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_combination_of_amount_template() {
        let service = InMemoryCombinationService::default();
        let mut parameters = BTreeMap::new();
        parameters.insert("1_restriction_type".to_string(), json!("lte"));
        parameters.insert("1_amount_limit".to_string(), json!(500000));
        let response = service
            .combine(&CombinationRequest {
                template_ids: vec![1],
                operator: LogicalOperator::And,
                parameters,
            })
            .await
            .unwrap();

        assert_eq!(
            response.condition,
            json!({"operator": "and", "rules": [
                {"field": "data.amount", "operator": "lte", "value": 500000}
            ]})
        );
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_combination_rejects_unknown_template() {
        let service = InMemoryCombinationService::default();
        let result = service
            .combine(&CombinationRequest {
                template_ids: vec![42],
                operator: LogicalOperator::And,
                parameters: BTreeMap::new(),
            })
            .await;
        assert!(matches!(result, Err(InfraError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_policy_update_requires_existing_record() {
        let repo = InMemoryPolicyRepository::new();
        let payload = PolicyPayload {
            name: "Office hours".to_string(),
            description: None,
            action_code: None,
            effect: Default::default(),
            priority: 10,
            template_ids: vec![],
            conditions: Default::default(),
        };
        assert!(repo.update_policy("missing", &payload).await.is_err());

        let created = repo.create_policy(&payload).await.unwrap();
        let fetched = repo.get_policy(&created.id).await.unwrap();
        assert_eq!(fetched, Some(created));
    }
}
