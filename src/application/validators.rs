use crate::application::commands::SavePolicyCommand;
use crate::application::services::ConditionPipeline;
use crate::domain::condition::{ConditionNode, Operator};
use crate::domain::template::{ParamInputKind, PolicyTemplate, TemplateId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Validation error types
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    FieldValidation { field: String, message: String },
    BusinessRule { message: String },
    NoValidRules,
    ParametersIncomplete(Vec<ParameterAssessment>),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::FieldValidation { field, message } => {
                write!(f, "Field validation failed: {field} - {message}")
            }
            ValidationError::BusinessRule { message } => {
                write!(f, "Business rule violation: {message}")
            }
            ValidationError::NoValidRules => {
                write!(f, "Condition must contain at least one complete rule")
            }
            ValidationError::ParametersIncomplete(assessments) => {
                let missing: Vec<String> = assessments
                    .iter()
                    .flat_map(|a| {
                        a.missing_parameters
                            .iter()
                            .map(move |p| format!("{}.{}", a.template_id, p))
                    })
                    .collect();
                write!(f, "Template parameters incomplete: {}", missing.join(", "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Base trait for command validation
#[async_trait]
pub trait CommandValidator<C>: Send + Sync {
    async fn validate(&self, command: &C) -> Result<(), ValidationError>;
}

// ============================================================================
// PRUNING
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PruneOutcome {
    pub tree: ConditionNode,
    pub has_valid_rule: bool,
}

/// Removes incomplete rules, then groups left empty, bottom-up.
/// The root survives as an empty group so the tree keeps its shape.
pub fn prune(root: ConditionNode) -> PruneOutcome {
    let root_operator = root.as_group().map(|g| g.operator).unwrap_or_default();
    let tree = prune_node(root)
        .unwrap_or_else(|| ConditionNode::group(root_operator, vec![]));
    let has_valid_rule = tree.complete_rule_count() > 0;
    PruneOutcome {
        tree,
        has_valid_rule,
    }
}

fn prune_node(node: ConditionNode) -> Option<ConditionNode> {
    match node {
        ConditionNode::Rule(rule) => rule.is_complete().then_some(ConditionNode::Rule(rule)),
        ConditionNode::Group(mut group) => {
            group.rules = group.rules.into_iter().filter_map(prune_node).collect();
            (!group.rules.is_empty()).then_some(ConditionNode::Group(group))
        }
        ConditionNode::AccessRestriction(mut wrapper) => {
            wrapper.rules = wrapper.rules.into_iter().filter_map(prune_node).collect();
            (!wrapper.rules.is_empty()).then_some(ConditionNode::AccessRestriction(wrapper))
        }
    }
}

/// Drops rules whose field or operator lies outside the given vocabulary.
/// An empty list leaves that side unrestricted; rules without an operator are left to pruning.
pub fn restrict_to_vocabulary(
    node: ConditionNode,
    fields: &[String],
    operators: &[Operator],
) -> ConditionNode {
    restrict_node(node, fields, operators).unwrap_or_default()
}

fn restrict_node(
    node: ConditionNode,
    fields: &[String],
    operators: &[Operator],
) -> Option<ConditionNode> {
    match node {
        ConditionNode::Rule(rule) => {
            let field_allowed = fields.is_empty() || fields.iter().any(|f| *f == rule.field);
            let operator_allowed = operators.is_empty()
                || rule.operator.is_none_or(|op| operators.contains(&op));
            (field_allowed && operator_allowed).then_some(ConditionNode::Rule(rule))
        }
        ConditionNode::Group(mut group) => {
            group.rules = group
                .rules
                .into_iter()
                .filter_map(|n| restrict_node(n, fields, operators))
                .collect();
            Some(ConditionNode::Group(group))
        }
        ConditionNode::AccessRestriction(mut wrapper) => {
            wrapper.rules = wrapper
                .rules
                .into_iter()
                .filter_map(|n| restrict_node(n, fields, operators))
                .collect();
            Some(ConditionNode::AccessRestriction(wrapper))
        }
    }
}

/// Submission gate: a policy needs at least one complete rule.
pub struct ConditionValidator;

impl ConditionValidator {
    pub fn validate_for_submission(outcome: &PruneOutcome) -> Result<(), ValidationError> {
        if outcome.has_valid_rule {
            Ok(())
        } else {
            Err(ValidationError::NoValidRules)
        }
    }

    pub fn validate_policy_name(name: &str) -> Result<(), ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::FieldValidation {
                field: "name".to_string(),
                message: "Policy name cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_priority(priority: i32) -> Result<(), ValidationError> {
        if !(1..=100).contains(&priority) {
            return Err(ValidationError::FieldValidation {
                field: "priority".to_string(),
                message: "Priority must be between 1 and 100".to_string(),
            });
        }
        Ok(())
    }
}

const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// Save policy command validator
pub struct SavePolicyCommandValidator;

#[async_trait]
impl CommandValidator<SavePolicyCommand> for SavePolicyCommandValidator {
    async fn validate(&self, command: &SavePolicyCommand) -> Result<(), ValidationError> {
        ConditionValidator::validate_policy_name(&command.name)?;
        ConditionValidator::validate_priority(command.priority)?;
        if command
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH)
        {
            return Err(ValidationError::FieldValidation {
                field: "description".to_string(),
                message: format!("Description cannot exceed {MAX_DESCRIPTION_LENGTH} characters"),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TEMPLATE PARAMETER ASSESSMENT
// ============================================================================

pub const RESTRICTION_TYPE_PARAM: &str = "restriction_type";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterAssessment {
    pub template_id: TemplateId,
    pub missing_parameters: Vec<String>,
    pub needs_department_selection: bool,
}

impl ParameterAssessment {
    pub fn is_complete(&self) -> bool {
        self.missing_parameters.is_empty()
    }
}

pub struct TemplateParameterValidator;

impl TemplateParameterValidator {
    /// Checks whether a template's current values are enough to request a condition.
    pub fn assess(
        template: &PolicyTemplate,
        values: Option<&BTreeMap<String, serde_json::Value>>,
        pipeline: &ConditionPipeline,
    ) -> ParameterAssessment {
        let value_of = |key: &str| values.and_then(|v| v.get(key));
        let restriction_is_membership = value_of(RESTRICTION_TYPE_PARAM)
            .and_then(serde_json::Value::as_str)
            .is_some_and(|t| t == "in" || t == "not_in");

        let mut missing_parameters = vec![];
        let mut needs_department_selection = false;

        for (key, spec) in &template.parameters.configurable_values {
            let value = value_of(key);
            let missing = match spec.kind {
                ParamInputKind::DepartmentSelection => {
                    let empty = is_blank(value);
                    if empty && restriction_is_membership {
                        needs_department_selection = true;
                    }
                    empty && (spec.required || restriction_is_membership)
                }
                ParamInputKind::ConditionBuilder => {
                    spec.required
                        && !value
                            .map(|v| pipeline.run_within_vocabulary(v, spec).has_valid_rule)
                            .unwrap_or(false)
                }
                _ => spec.required && is_blank(value),
            };
            if missing {
                missing_parameters.push(key.clone());
            }
        }

        ParameterAssessment {
            template_id: template.id,
            missing_parameters,
            needs_department_selection,
        }
    }
}

/// Absent, null, empty string or empty array.
pub fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{LogicalOperator, Operator, Rule, Scalar};
    use crate::domain::template::{ParamSpec, TemplateParameters};
    use serde_json::json;

    fn department_template() -> PolicyTemplate {
        let mut configurable_values = BTreeMap::new();
        configurable_values.insert(
            "restriction_type".to_string(),
            ParamSpec::new(ParamInputKind::Select, "Mode").required(),
        );
        configurable_values.insert(
            "department_ids".to_string(),
            ParamSpec::new(ParamInputKind::DepartmentSelection, "Departments"),
        );
        PolicyTemplate {
            id: 2,
            template_code: "department_restriction".to_string(),
            name: "Department restriction".to_string(),
            condition_rule: Default::default(),
            parameters: TemplateParameters { configurable_values },
        }
    }

    #[test]
    fn test_prune_drops_incomplete_membership_rule() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![
                ConditionNode::rule("user.department_id", Operator::In, Vec::<i64>::new()),
                ConditionNode::rule("data.amount", Operator::Gte, Scalar::from(100)),
            ],
        );
        let outcome = prune(tree);
        assert!(outcome.has_valid_rule);
        assert_eq!(
            outcome.tree,
            ConditionNode::group(
                LogicalOperator::And,
                vec![ConditionNode::rule("data.amount", Operator::Gte, Scalar::from(100))]
            )
        );
    }

    #[test]
    fn test_prune_removes_emptied_groups_bottom_up() {
        let tree = ConditionNode::group(
            LogicalOperator::Or,
            vec![
                ConditionNode::group(
                    LogicalOperator::And,
                    vec![
                        ConditionNode::Rule(Rule::default()),
                        ConditionNode::group(LogicalOperator::Or, vec![]),
                    ],
                ),
                ConditionNode::rule("user.id", Operator::Eq, Scalar::from(1)),
            ],
        );
        let outcome = prune(tree);
        assert_eq!(
            outcome.tree,
            ConditionNode::group(
                LogicalOperator::Or,
                vec![ConditionNode::rule("user.id", Operator::Eq, Scalar::from(1))]
            )
        );
    }

    #[test]
    fn test_prune_keeps_empty_root_and_reports_no_rules() {
        let tree = ConditionNode::group(
            LogicalOperator::Or,
            vec![ConditionNode::Rule(Rule::default())],
        );
        let outcome = prune(tree);
        assert!(!outcome.has_valid_rule);
        assert_eq!(outcome.tree, ConditionNode::group(LogicalOperator::Or, vec![]));
        assert_eq!(
            ConditionValidator::validate_for_submission(&outcome),
            Err(ValidationError::NoValidRules)
        );
    }

    #[test]
    fn test_department_selection_needed_for_membership_restriction() {
        let pipeline = ConditionPipeline::default();
        let template = department_template();

        let mut values = BTreeMap::new();
        values.insert("restriction_type".to_string(), json!("in"));
        values.insert("department_ids".to_string(), json!([]));
        let assessment = TemplateParameterValidator::assess(&template, Some(&values), &pipeline);
        assert!(assessment.needs_department_selection);
        assert_eq!(assessment.missing_parameters, vec!["department_ids".to_string()]);

        values.insert("department_ids".to_string(), json!([4]));
        let assessment = TemplateParameterValidator::assess(&template, Some(&values), &pipeline);
        assert!(assessment.is_complete());
        assert!(!assessment.needs_department_selection);
    }

    #[test]
    fn test_missing_required_parameter() {
        let pipeline = ConditionPipeline::default();
        let assessment = TemplateParameterValidator::assess(&department_template(), None, &pipeline);
        assert_eq!(assessment.missing_parameters, vec!["restriction_type".to_string()]);
        assert!(!assessment.needs_department_selection);
    }

    fn access_template() -> PolicyTemplate {
        let mut configurable_values = BTreeMap::new();
        configurable_values.insert(
            "access_condition".to_string(),
            ParamSpec::new(ParamInputKind::ConditionBuilder, "Who may act")
                .required()
                .with_vocabulary(&["user.department_id"], &[Operator::Eq, Operator::In]),
        );
        PolicyTemplate {
            id: 4,
            template_code: "user_access_restriction".to_string(),
            name: "User access".to_string(),
            condition_rule: Default::default(),
            parameters: TemplateParameters { configurable_values },
        }
    }

    #[test]
    fn test_condition_builder_outside_vocabulary_is_missing() {
        let pipeline = ConditionPipeline::default();
        let template = access_template();

        let mut values = BTreeMap::new();
        values.insert(
            "access_condition".to_string(),
            json!({"operator": "and", "rules": [
                {"field": "data.amount", "operator": "gt", "value": 1},
                {"field": "user.department_id", "operator": "gte", "value": 2}
            ]}),
        );
        let assessment = TemplateParameterValidator::assess(&template, Some(&values), &pipeline);
        assert_eq!(assessment.missing_parameters, vec!["access_condition".to_string()]);

        values.insert(
            "access_condition".to_string(),
            json!({"operator": "and", "rules": [
                {"field": "user.department_id", "operator": "in", "value": [3]}
            ]}),
        );
        let assessment = TemplateParameterValidator::assess(&template, Some(&values), &pipeline);
        assert!(assessment.is_complete());
    }

    #[test]
    fn test_restrict_to_vocabulary_keeps_open_sides() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![
                ConditionNode::rule("user.role_id", Operator::Eq, Scalar::from(1)),
                ConditionNode::group(
                    LogicalOperator::Or,
                    vec![ConditionNode::rule("data.amount", Operator::Lt, Scalar::from(5))],
                ),
            ],
        );

        let unrestricted = restrict_to_vocabulary(tree.clone(), &[], &[]);
        assert_eq!(unrestricted, tree);

        let by_operator = restrict_to_vocabulary(tree, &[], &[Operator::Eq]);
        assert_eq!(
            by_operator,
            ConditionNode::group(
                LogicalOperator::And,
                vec![
                    ConditionNode::rule("user.role_id", Operator::Eq, Scalar::from(1)),
                    ConditionNode::group(LogicalOperator::Or, vec![]),
                ],
            )
        );
    }

    #[tokio::test]
    async fn test_save_policy_command_validator() {
        let command = SavePolicyCommand {
            session_id: "s".to_string(),
            name: "Large amounts".to_string(),
            description: None,
            effect: Default::default(),
            priority: 50,
        };
        assert!(SavePolicyCommandValidator.validate(&command).await.is_ok());

        let unnamed = SavePolicyCommand {
            name: " ".to_string(),
            ..command.clone()
        };
        assert!(matches!(
            SavePolicyCommandValidator.validate(&unnamed).await,
            Err(ValidationError::FieldValidation { field, .. }) if field == "name"
        ));

        let verbose = SavePolicyCommand {
            description: Some("x".repeat(1001)),
            ..command
        };
        assert!(SavePolicyCommandValidator.validate(&verbose).await.is_err());
    }

    #[test]
    fn test_field_validators() {
        assert!(ConditionValidator::validate_policy_name("  ").is_err());
        assert!(ConditionValidator::validate_priority(0).is_err());
        assert!(ConditionValidator::validate_priority(100).is_ok());
    }
}
