use crate::application::coercion::{coerce_scalar, coerce_tree};
use crate::application::expander::{collapse_root, expand_access_restrictions};
use crate::application::normalizer::{normalize, normalize_value};
use crate::application::session::SessionError;
use crate::application::validators::{
    ParameterAssessment, PruneOutcome, TemplateParameterValidator, ValidationError, is_blank, prune,
    restrict_to_vocabulary,
};
use crate::domain::attribute::AttributeCatalog;
use crate::domain::condition::{ConditionNode, LogicalOperator, Scalar};
use crate::domain::template::{
    CombinationRequest, ParamInputKind, ParamSpec, PolicyTemplate, TemplateId,
    TemplateParameterMap, parameter_wire_key,
};
use crate::infrastructure::{CombinationService, InfraError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("Condition text could not be parsed: {0}")]
    Unparseable(String),
    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),
    #[error("No templates selected")]
    NoTemplatesSelected,
    #[error("Combination service failed: {0}")]
    Combination(InfraError),
    #[error("Combination service returned a condition without any complete rule")]
    EmptyCombination,
    #[error("Backend error: {0}")]
    Backend(#[from] InfraError),
    #[error("Authoring session not found: {0}")]
    SessionNotFound(String),
    #[error("Policy not found: {0}")]
    PolicyNotFound(String),
}

// ============================================================================
// CONDITION PIPELINE
// ============================================================================

/// normalize -> expand legacy wrappers -> coerce values -> prune.
#[derive(Clone, Debug, Default)]
pub struct ConditionPipeline {
    catalog: Arc<AttributeCatalog>,
}

impl ConditionPipeline {
    pub fn new(catalog: Arc<AttributeCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    /// Everything but pruning; incomplete rules survive so editing can continue.
    pub fn canonicalize(&self, node: ConditionNode) -> ConditionNode {
        coerce_tree(expand_access_restrictions(normalize(node)), &self.catalog)
    }

    pub fn run(&self, node: ConditionNode) -> PruneOutcome {
        let outcome = self.finish(self.canonicalize(node));
        debug!(
            has_valid_rule = outcome.has_valid_rule,
            rules = outcome.tree.complete_rule_count(),
            "Condition pipeline finished"
        );
        outcome
    }

    pub fn run_value(&self, raw: &serde_json::Value) -> PruneOutcome {
        self.run(normalize_value(raw))
    }

    /// Full pipeline for a `condition_builder` parameter: rules outside the
    /// template's fields or operators are dropped before pruning.
    pub fn run_within_vocabulary(&self, raw: &serde_json::Value, spec: &ParamSpec) -> PruneOutcome {
        let canonical = self.canonicalize(normalize_value(raw));
        self.finish(restrict_to_vocabulary(canonical, &spec.fields, &spec.operators))
    }

    // Pruning can leave the root holding a single `and` group, so collapse runs again.
    fn finish(&self, tree: ConditionNode) -> PruneOutcome {
        let mut outcome = prune(tree);
        outcome.tree = collapse_root(outcome.tree);
        outcome
    }
}

// ============================================================================
// TEMPLATE CONDITION GENERATOR
// ============================================================================

/// Turns template selections plus parameter values into a combined condition.
/// The template-to-rule mapping belongs to the backend; this side only prepares
/// parameters, gates incomplete input and sanitizes the response.
pub struct TemplateConditionGenerator {
    combination_service: Arc<dyn CombinationService>,
    pipeline: ConditionPipeline,
}

impl TemplateConditionGenerator {
    pub fn new(combination_service: Arc<dyn CombinationService>, pipeline: ConditionPipeline) -> Self {
        Self {
            combination_service,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &ConditionPipeline {
        &self.pipeline
    }

    pub fn assess(
        &self,
        templates: &[PolicyTemplate],
        selected: &[TemplateId],
        parameters: &TemplateParameterMap,
    ) -> Vec<ParameterAssessment> {
        selected
            .iter()
            .filter_map(|id| templates.iter().find(|t| t.id == *id))
            .map(|t| TemplateParameterValidator::assess(t, parameters.get(&t.id), &self.pipeline))
            .collect()
    }

    /// Builds the combination request, or reports why generation must be skipped.
    pub fn prepare_request(
        &self,
        templates: &[PolicyTemplate],
        selected: &[TemplateId],
        parameters: &TemplateParameterMap,
    ) -> Result<CombinationRequest, ConditionError> {
        if selected.is_empty() {
            return Err(ConditionError::NoTemplatesSelected);
        }

        let mut incomplete = vec![];
        let mut wire_parameters = BTreeMap::new();
        for id in selected {
            let template = templates
                .iter()
                .find(|t| t.id == *id)
                .ok_or(ConditionError::UnknownTemplate(*id))?;
            let values = parameters.get(id);

            let assessment = TemplateParameterValidator::assess(template, values, &self.pipeline);
            if !assessment.is_complete() {
                incomplete.push(assessment);
                continue;
            }

            for (key, value) in values.into_iter().flatten() {
                if let Some(prepared) =
                    prepare_parameter(template.param_spec(key), value, &self.pipeline)
                {
                    wire_parameters.insert(parameter_wire_key(*id, key), prepared);
                }
            }
        }

        if !incomplete.is_empty() {
            return Err(ValidationError::ParametersIncomplete(incomplete).into());
        }

        Ok(CombinationRequest {
            template_ids: selected.to_vec(),
            operator: LogicalOperator::And,
            parameters: wire_parameters,
        })
    }

    /// Calls the combination service and runs the result through the pipeline.
    #[instrument(name = "generate_template_condition", skip(self, request), fields(templates = ?request.template_ids))]
    pub async fn generate(&self, request: &CombinationRequest) -> Result<PruneOutcome, ConditionError> {
        let response = self
            .combination_service
            .combine(request)
            .await
            .map_err(|e| {
                error!(error = %e, "Combination service call failed");
                ConditionError::Combination(e)
            })?;

        let outcome = self.pipeline.run_value(&response.condition);
        if !outcome.has_valid_rule {
            warn!("Combination service returned an empty condition");
            return Err(ConditionError::EmptyCombination);
        }
        info!(
            rules = outcome.tree.complete_rule_count(),
            "Template condition generated"
        );
        Ok(outcome)
    }
}

/// Applies per-kind parameter rules before transmission. `None` means "do not send".
pub fn prepare_parameter(
    spec: Option<&ParamSpec>,
    value: &serde_json::Value,
    pipeline: &ConditionPipeline,
) -> Option<serde_json::Value> {
    if value.is_null() {
        return None;
    }
    let Some(spec) = spec else {
        return Some(value.clone());
    };

    match spec.kind {
        ParamInputKind::Date => (!is_blank(Some(value))).then(|| value.clone()),
        ParamInputKind::Number => match value {
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(coerce_scalar(Scalar::String(s.clone())).to_json()),
            other => Some(other.clone()),
        },
        ParamInputKind::ConditionBuilder => {
            let outcome = pipeline.run_within_vocabulary(value, spec);
            outcome.has_valid_rule.then(|| outcome.tree.to_json())
        }
        ParamInputKind::Array | ParamInputKind::DepartmentSelection => match value {
            serde_json::Value::Array(items) => Some(serde_json::Value::Array(
                items
                    .iter()
                    .filter_map(Scalar::from_json)
                    .map(|s| coerce_scalar(s).to_json())
                    .collect(),
            )),
            other if is_blank(Some(other)) => Some(serde_json::Value::Array(vec![])),
            other => Some(serde_json::Value::Array(
                Scalar::from_json(other)
                    .map(|s| vec![coerce_scalar(s).to_json()])
                    .unwrap_or_default(),
            )),
        },
        ParamInputKind::Select | ParamInputKind::Text => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::Operator;
    use serde_json::json;

    #[test]
    fn test_pipeline_runs_all_stages() {
        let pipeline = ConditionPipeline::default();
        let raw = json!({
            "operator": "and",
            "rules": {"0": {
                "field": "user.access_restriction",
                "operator": "and",
                "rules": [
                    {"field": "user.department_id", "operator": "in", "value": ["3", "5"]},
                    {"field": "data.amount", "operator": "gte", "value": ["42"]},
                    {"field": "", "operator": "eq", "value": 1}
                ]
            }}
        });

        let outcome = pipeline.run_value(&raw);
        assert!(outcome.has_valid_rule);
        assert_eq!(
            outcome.tree,
            ConditionNode::group(
                LogicalOperator::And,
                vec![
                    ConditionNode::rule("user.department_id", Operator::In, vec![3, 5]),
                    ConditionNode::rule("data.amount", Operator::Gte, Scalar::from(42)),
                ]
            )
        );
    }

    #[test]
    fn test_prepare_parameter_rules() {
        let pipeline = ConditionPipeline::default();
        let date = ParamSpec::new(ParamInputKind::Date, "Start");
        let number = ParamSpec::new(ParamInputKind::Number, "Limit");
        let departments = ParamSpec::new(ParamInputKind::DepartmentSelection, "Departments");
        let builder = ParamSpec::new(ParamInputKind::ConditionBuilder, "Access");

        assert_eq!(prepare_parameter(Some(&date), &json!(""), &pipeline), None);
        assert_eq!(prepare_parameter(Some(&date), &json!(null), &pipeline), None);
        assert_eq!(
            prepare_parameter(Some(&date), &json!("2026-01-01"), &pipeline),
            Some(json!("2026-01-01"))
        );
        assert_eq!(
            prepare_parameter(Some(&number), &json!("500000"), &pipeline),
            Some(json!(500000))
        );
        assert_eq!(prepare_parameter(Some(&number), &json!(" "), &pipeline), None);
        assert_eq!(
            prepare_parameter(Some(&departments), &json!(["1", 2]), &pipeline),
            Some(json!([1, 2]))
        );
        assert_eq!(
            prepare_parameter(
                Some(&builder),
                &json!({"operator": "and", "rules": [{"field": "user.id", "operator": "in", "value": []}]}),
                &pipeline
            ),
            None
        );
        let scoped = ParamSpec::new(ParamInputKind::ConditionBuilder, "Access")
            .with_vocabulary(&["user.department_id"], &[Operator::Eq, Operator::In]);
        assert_eq!(
            prepare_parameter(
                Some(&scoped),
                &json!({"operator": "and", "rules": [{"field": "data.amount", "operator": "gt", "value": 1}]}),
                &pipeline
            ),
            None
        );
        assert_eq!(
            prepare_parameter(
                Some(&scoped),
                &json!({"operator": "and", "rules": [
                    {"field": "data.amount", "operator": "gt", "value": 1},
                    {"field": "user.department_id", "operator": "in", "value": ["3"]}
                ]}),
                &pipeline
            ),
            Some(json!({"operator": "and", "rules": [
                {"field": "user.department_id", "operator": "in", "value": [3]}
            ]}))
        );
        assert_eq!(
            prepare_parameter(None, &json!("free text"), &pipeline),
            Some(json!("free text"))
        );
    }
}
