use super::queries::{
    ConditionPreview, GetSessionQuery, ListAttributeOptionsQuery, ListAttributesQuery,
    ListTemplatesQuery, NormalizeConditionQuery, NormalizedCondition, PreviewConditionQuery,
};
use super::query_bus::QueryHandler;
use super::serialization::{to_pretty_text, to_text};
use super::services::{ConditionError, ConditionPipeline, TemplateConditionGenerator};
use super::session::SessionSnapshot;
use super::validators::ValidationError;
use crate::domain::attribute::{AttributeDefinition, AttributeOption};
use crate::domain::template::PolicyTemplate;
use crate::infrastructure::{AttributeOptionProvider, SessionRepository, TemplateCatalog};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

// ============================================================================
// QUERY HANDLERS
// ============================================================================

/// Get session query handler
pub struct GetSessionQueryHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl GetSessionQueryHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl QueryHandler<GetSessionQuery> for GetSessionQueryHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "get_session_query_handler", skip(self, query), fields(session_id = %query.session_id))]
    async fn handle(&self, query: GetSessionQuery) -> Result<Self::Result, Self::Error> {
        let session = self
            .sessions
            .get(&query.session_id)
            .await?
            .ok_or(ConditionError::SessionNotFound(query.session_id))?;
        let session = session.lock().await;
        Ok(session.snapshot(&self.generator))
    }
}

/// Preview condition query handler
pub struct PreviewConditionQueryHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    pipeline: ConditionPipeline,
}

impl PreviewConditionQueryHandler {
    pub fn new(sessions: Arc<dyn SessionRepository + Send + Sync>, pipeline: ConditionPipeline) -> Self {
        Self { sessions, pipeline }
    }
}

#[async_trait]
impl QueryHandler<PreviewConditionQuery> for PreviewConditionQueryHandler {
    type Result = ConditionPreview;
    type Error = ConditionError;

    #[instrument(name = "preview_condition_query_handler", skip(self, query), fields(session_id = %query.session_id))]
    async fn handle(&self, query: PreviewConditionQuery) -> Result<Self::Result, Self::Error> {
        let session = self
            .sessions
            .get(&query.session_id)
            .await?
            .ok_or(ConditionError::SessionNotFound(query.session_id))?;
        let outcome = session.lock().await.prepared_condition(&self.pipeline);

        let text = if query.pretty {
            to_pretty_text(&outcome.tree)?
        } else {
            to_text(&outcome.tree)?
        };
        Ok(ConditionPreview {
            text,
            has_valid_rule: outcome.has_valid_rule,
            rule_count: outcome.tree.complete_rule_count(),
        })
    }
}

/// List templates query handler
pub struct ListTemplatesQueryHandler {
    template_catalog: Arc<dyn TemplateCatalog + Send + Sync>,
}

impl ListTemplatesQueryHandler {
    pub fn new(template_catalog: Arc<dyn TemplateCatalog + Send + Sync>) -> Self {
        Self { template_catalog }
    }
}

#[async_trait]
impl QueryHandler<ListTemplatesQuery> for ListTemplatesQueryHandler {
    type Result = Vec<PolicyTemplate>;
    type Error = ConditionError;

    #[instrument(name = "list_templates_query_handler", skip(self))]
    async fn handle(&self, query: ListTemplatesQuery) -> Result<Self::Result, Self::Error> {
        Ok(self
            .template_catalog
            .list_templates(query.action_code.as_deref())
            .await?)
    }
}

/// List attributes query handler
pub struct ListAttributesQueryHandler {
    pipeline: ConditionPipeline,
}

impl ListAttributesQueryHandler {
    pub fn new(pipeline: ConditionPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl QueryHandler<ListAttributesQuery> for ListAttributesQueryHandler {
    type Result = Vec<AttributeDefinition>;
    type Error = ConditionError;

    async fn handle(&self, _query: ListAttributesQuery) -> Result<Self::Result, Self::Error> {
        Ok(self.pipeline.catalog().attributes().to_vec())
    }
}

/// List attribute options query handler
pub struct ListAttributeOptionsQueryHandler {
    option_provider: Arc<dyn AttributeOptionProvider + Send + Sync>,
    pipeline: ConditionPipeline,
}

impl ListAttributeOptionsQueryHandler {
    pub fn new(
        option_provider: Arc<dyn AttributeOptionProvider + Send + Sync>,
        pipeline: ConditionPipeline,
    ) -> Self {
        Self {
            option_provider,
            pipeline,
        }
    }
}

#[async_trait]
impl QueryHandler<ListAttributeOptionsQuery> for ListAttributeOptionsQueryHandler {
    type Result = BTreeMap<String, Vec<AttributeOption>>;
    type Error = ConditionError;

    /// Lookups run concurrently; attributes without an option source get an empty list.
    #[instrument(name = "list_attribute_options_query_handler", skip(self), fields(keys = ?query.attribute_keys))]
    async fn handle(&self, query: ListAttributeOptionsQuery) -> Result<Self::Result, Self::Error> {
        let mut sources = Vec::with_capacity(query.attribute_keys.len());
        for key in &query.attribute_keys {
            let attribute = self.pipeline.catalog().lookup(key).ok_or_else(|| {
                ValidationError::FieldValidation {
                    field: "keys".to_string(),
                    message: format!("Unknown attribute: {key}"),
                }
            })?;
            sources.push((key.clone(), attribute.option_source));
        }

        let lookups = sources.iter().map(|(_, source)| async move {
            match source {
                Some(source) => self.option_provider.list_options(*source).await,
                None => Ok(vec![]),
            }
        });
        let results = futures::future::join_all(lookups).await;

        let mut options = BTreeMap::new();
        for ((key, _), result) in sources.into_iter().zip(results) {
            options.insert(key, result?);
        }
        Ok(options)
    }
}

/// Normalize condition query handler
pub struct NormalizeConditionQueryHandler {
    pipeline: ConditionPipeline,
}

impl NormalizeConditionQueryHandler {
    pub fn new(pipeline: ConditionPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl QueryHandler<NormalizeConditionQuery> for NormalizeConditionQueryHandler {
    type Result = NormalizedCondition;
    type Error = ConditionError;

    #[instrument(name = "normalize_condition_query_handler", skip(self, query))]
    async fn handle(&self, query: NormalizeConditionQuery) -> Result<Self::Result, Self::Error> {
        let outcome = match &query.condition {
            serde_json::Value::String(text) => super::serialization::parse_text(text, &self.pipeline)?,
            raw => self.pipeline.run_value(raw),
        };
        Ok(NormalizedCondition {
            condition: outcome.tree,
            has_valid_rule: outcome.has_valid_rule,
        })
    }
}
