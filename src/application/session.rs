use crate::application::coercion::coerce_rule;
use crate::application::normalizer::{normalize, normalize_value};
use crate::application::serialization::parse_text;
use crate::application::services::{ConditionError, ConditionPipeline, TemplateConditionGenerator};
use crate::application::validators::{ParameterAssessment, PruneOutcome, ValidationError};
use crate::domain::condition::{ConditionNode, Group, LogicalOperator, Operator, Rule, RuleValue};
use crate::domain::policy::PolicyRecord;
use crate::domain::template::{CombinationRequest, PolicyTemplate, TemplateId, TemplateParameterMap};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Index path from the root group; `[]` is the root.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("No node at path {0:?}")]
    InvalidPath(NodePath),
    #[error("Node at path {0:?} is not a group")]
    NotAGroup(NodePath),
    #[error("Node at path {0:?} is not a rule")]
    NotARule(NodePath),
    #[error("The root group cannot be deleted")]
    CannotDeleteRoot,
    #[error("Operator {operator} is not allowed for {field}")]
    OperatorNotAllowed { field: String, operator: Operator },
    #[error("Template {0} is not available for this action")]
    TemplateNotAvailable(TemplateId),
}

/// Partial edit of a rule; unset members are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub field: Option<String>,
    pub operator: Option<Operator>,
    pub value: Option<serde_json::Value>,
}

/// Work handed to the caller: await the request outside the session lock,
/// then report back with [`AuthoringSession::complete_generation`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTicket {
    pub sequence: u64,
    pub request: CombinationRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationPlan {
    Ready(GenerationTicket),
    Skipped(Vec<ParameterAssessment>),
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Applied,
    Stale,
    Failed(String),
}

/// State of one policy-authoring wizard, owned exclusively by that session.
#[derive(Debug, Clone)]
pub struct AuthoringSession {
    pub id: String,
    pub action_code: Option<String>,
    pub policy_id: Option<String>,
    pub condition: ConditionNode,
    pub templates: Vec<PolicyTemplate>,
    pub selected_templates: Vec<TemplateId>,
    pub parameters: TemplateParameterMap,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    generation_sequence: u64,
    applied_sequence: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub action_code: Option<String>,
    pub policy_id: Option<String>,
    pub condition: ConditionNode,
    pub selected_templates: Vec<TemplateId>,
    pub parameters: TemplateParameterMap,
    pub parameter_status: Vec<ParameterAssessment>,
    pub needs_department_selection: bool,
    pub has_valid_rule: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AuthoringSession {
    pub fn new(action_code: Option<String>, templates: Vec<PolicyTemplate>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_code,
            policy_id: None,
            condition: ConditionNode::Group(Group::empty()),
            templates,
            selected_templates: vec![],
            parameters: TemplateParameterMap::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
            generation_sequence: 0,
            applied_sequence: None,
        }
    }

    /// Starts editing a persisted policy; legacy shapes are expanded on load.
    pub fn editing(mut self, record: &PolicyRecord, pipeline: &ConditionPipeline) -> Self {
        self.policy_id = Some(record.id.clone());
        self.condition = pipeline.canonicalize(normalize_value(&record.conditions));
        self.selected_templates = record
            .template_ids
            .iter()
            .copied()
            .filter(|id| self.templates.iter().any(|t| t.id == *id))
            .collect();
        self
    }

    pub fn generation_sequence(&self) -> u64 {
        self.generation_sequence
    }

    pub fn applied_sequence(&self) -> Option<u64> {
        self.applied_sequence
    }

    fn touch(&mut self) {
        self.condition = normalize(std::mem::take(&mut self.condition));
        self.updated_at = Utc::now();
    }

    fn node_at_mut(&mut self, path: &[usize]) -> Result<&mut ConditionNode, SessionError> {
        let mut node = &mut self.condition;
        for (depth, index) in path.iter().enumerate() {
            node = match node {
                ConditionNode::Group(group) => group
                    .rules
                    .get_mut(*index)
                    .ok_or_else(|| SessionError::InvalidPath(path.to_vec()))?,
                _ => return Err(SessionError::NotAGroup(path[..depth].to_vec())),
            };
        }
        Ok(node)
    }

    fn group_at_mut(&mut self, path: &[usize]) -> Result<&mut Group, SessionError> {
        self.node_at_mut(path)?
            .as_group_mut()
            .ok_or_else(|| SessionError::NotAGroup(path.to_vec()))
    }

    // ------------------------------------------------------------------
    // Tree editing
    // ------------------------------------------------------------------

    pub fn add_rule(
        &mut self,
        parent: &[usize],
        rule: Rule,
        pipeline: &ConditionPipeline,
    ) -> Result<NodePath, SessionError> {
        if let Some(operator) = rule.operator {
            if !pipeline.catalog().is_operator_allowed(&rule.field, operator) {
                return Err(SessionError::OperatorNotAllowed {
                    field: rule.field,
                    operator,
                });
            }
        }
        let rule = coerce_rule(rule, pipeline.catalog());
        let group = self.group_at_mut(parent)?;
        group.rules.push(ConditionNode::Rule(rule));
        let index = group.rules.len() - 1;
        self.touch();
        Ok(child_path(parent, index))
    }

    pub fn add_group(
        &mut self,
        parent: &[usize],
        operator: LogicalOperator,
    ) -> Result<NodePath, SessionError> {
        let group = self.group_at_mut(parent)?;
        group.rules.push(ConditionNode::group(operator, vec![]));
        let index = group.rules.len() - 1;
        self.touch();
        Ok(child_path(parent, index))
    }

    /// Changing the field to an attribute that rejects the current operator
    /// resets operator and value.
    pub fn update_rule(
        &mut self,
        path: &[usize],
        update: RuleUpdate,
        pipeline: &ConditionPipeline,
    ) -> Result<(), SessionError> {
        let catalog = pipeline.catalog();
        let ConditionNode::Rule(rule) = self.node_at_mut(path)? else {
            return Err(SessionError::NotARule(path.to_vec()));
        };
        let mut edited = rule.clone();

        if let Some(field) = update.field {
            edited.field = field.trim().to_string();
            let still_legal = edited
                .operator
                .is_none_or(|op| catalog.is_operator_allowed(&edited.field, op));
            if !still_legal {
                edited.operator = catalog
                    .value_type_of(&edited.field)
                    .and_then(|t| t.operators().first().copied());
                edited.value = RuleValue::default();
            }
        }
        if let Some(operator) = update.operator {
            if !catalog.is_operator_allowed(&edited.field, operator) {
                return Err(SessionError::OperatorNotAllowed {
                    field: edited.field,
                    operator,
                });
            }
            edited.operator = Some(operator);
        }
        if let Some(value) = update.value {
            edited.value = RuleValue::from_json(&value);
        }

        *rule = coerce_rule(edited, catalog);
        self.touch();
        Ok(())
    }

    pub fn set_group_operator(
        &mut self,
        path: &[usize],
        operator: LogicalOperator,
    ) -> Result<(), SessionError> {
        self.group_at_mut(path)?.operator = operator;
        self.touch();
        Ok(())
    }

    pub fn delete_node(&mut self, path: &[usize]) -> Result<ConditionNode, SessionError> {
        let Some((index, parent)) = path.split_last() else {
            return Err(SessionError::CannotDeleteRoot);
        };
        let group = self.group_at_mut(parent)?;
        if *index >= group.rules.len() {
            return Err(SessionError::InvalidPath(path.to_vec()));
        }
        let removed = group.rules.remove(*index);
        self.touch();
        Ok(removed)
    }

    /// Reorders a child within its group.
    pub fn move_node(&mut self, parent: &[usize], from: usize, to: usize) -> Result<(), SessionError> {
        let group = self.group_at_mut(parent)?;
        let len = group.rules.len();
        if from >= len {
            return Err(SessionError::InvalidPath(child_path(parent, from)));
        }
        if to >= len {
            return Err(SessionError::InvalidPath(child_path(parent, to)));
        }
        let node = group.rules.remove(from);
        group.rules.insert(to, node);
        self.touch();
        Ok(())
    }

    pub fn replace_condition(&mut self, node: ConditionNode, pipeline: &ConditionPipeline) {
        self.condition = pipeline.canonicalize(node);
        self.touch();
    }

    /// Rejected text leaves the current tree untouched.
    pub fn paste_text(&mut self, text: &str, pipeline: &ConditionPipeline) -> Result<(), ConditionError> {
        let outcome = parse_text(text, pipeline)?;
        self.condition = outcome.tree;
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates and generation
    // ------------------------------------------------------------------

    /// Newly selected templates get their declared defaults; deselected ones keep
    /// their values in case they are selected again.
    pub fn select_templates(&mut self, ids: Vec<TemplateId>) -> Result<(), SessionError> {
        for id in &ids {
            let template = self
                .templates
                .iter()
                .find(|t| t.id == *id)
                .ok_or(SessionError::TemplateNotAvailable(*id))?;
            if !self.parameters.contains_key(id) {
                self.parameters.insert(*id, template.default_parameters());
            }
        }
        let mut seen = std::collections::HashSet::new();
        self.selected_templates = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        self.generation_sequence += 1;
        self.touch();
        Ok(())
    }

    pub fn set_parameter(
        &mut self,
        template_id: TemplateId,
        key: String,
        value: serde_json::Value,
    ) -> Result<(), SessionError> {
        if !self.templates.iter().any(|t| t.id == template_id) {
            return Err(SessionError::TemplateNotAvailable(template_id));
        }
        self.parameters
            .entry(template_id)
            .or_default()
            .insert(key, value);
        self.generation_sequence += 1;
        self.touch();
        Ok(())
    }

    pub fn parameter_status(&self, generator: &TemplateConditionGenerator) -> Vec<ParameterAssessment> {
        generator.assess(&self.templates, &self.selected_templates, &self.parameters)
    }

    /// Decides whether the current parameters warrant a combination request.
    pub fn begin_generation(
        &self,
        generator: &TemplateConditionGenerator,
    ) -> Result<GenerationPlan, ConditionError> {
        match generator.prepare_request(&self.templates, &self.selected_templates, &self.parameters) {
            Ok(request) => Ok(GenerationPlan::Ready(GenerationTicket {
                sequence: self.generation_sequence,
                request,
            })),
            Err(ConditionError::NoTemplatesSelected) => Ok(GenerationPlan::Idle),
            Err(ConditionError::Validation(ValidationError::ParametersIncomplete(status))) => {
                Ok(GenerationPlan::Skipped(status))
            }
            Err(other) => Err(other),
        }
    }

    /// Applies a finished generation unless a newer edit has happened since it began.
    pub fn complete_generation(
        &mut self,
        sequence: u64,
        result: Result<PruneOutcome, ConditionError>,
    ) -> GenerationOutcome {
        if sequence != self.generation_sequence {
            return GenerationOutcome::Stale;
        }
        match result {
            Ok(outcome) => {
                self.condition = outcome.tree;
                self.applied_sequence = Some(sequence);
                self.last_error = None;
                self.touch();
                GenerationOutcome::Applied
            }
            Err(e) => {
                let message = e.to_string();
                self.last_error = Some(message.clone());
                self.updated_at = Utc::now();
                GenerationOutcome::Failed(message)
            }
        }
    }

    /// The tree as it would be submitted.
    pub fn prepared_condition(&self, pipeline: &ConditionPipeline) -> PruneOutcome {
        pipeline.run(self.condition.clone())
    }

    pub fn snapshot(&self, generator: &TemplateConditionGenerator) -> SessionSnapshot {
        let parameter_status = self.parameter_status(generator);
        let needs_department_selection = parameter_status
            .iter()
            .any(|s| s.needs_department_selection);
        SessionSnapshot {
            id: self.id.clone(),
            action_code: self.action_code.clone(),
            policy_id: self.policy_id.clone(),
            condition: self.condition.clone(),
            selected_templates: self.selected_templates.clone(),
            parameters: self.parameters.clone(),
            parameter_status,
            needs_department_selection,
            has_valid_rule: self.condition.complete_rule_count() > 0,
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

fn child_path(parent: &[usize], index: usize) -> NodePath {
    let mut path = parent.to_vec();
    path.push(index);
    path
}
