use super::condition::{LogicalOperator, Operator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type TemplateId = i64;

/// Live parameter values, keyed by template id then parameter key.
pub type TemplateParameterMap = BTreeMap<TemplateId, BTreeMap<String, serde_json::Value>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamInputKind {
    Select,
    Number,
    Text,
    Array,
    Date,
    ConditionBuilder,
    DepartmentSelection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamOption {
    pub value: serde_json::Value,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamInputKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ParamOption>,
    /// Attribute vocabulary of a `condition_builder` parameter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<Operator>,
}

impl ParamSpec {
    pub fn new(kind: ParamInputKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            required: false,
            default: None,
            options: vec![],
            fields: vec![],
            operators: vec![],
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: Vec<(serde_json::Value, &str)>) -> Self {
        self.options = options
            .into_iter()
            .map(|(value, label)| ParamOption {
                value,
                label: label.to_string(),
            })
            .collect();
        self
    }

    pub fn with_vocabulary(mut self, fields: &[&str], operators: &[Operator]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self.operators = operators.to_vec();
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionRuleHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameters {
    #[serde(default)]
    pub configurable_values: BTreeMap<String, ParamSpec>,
}

/// Reusable, parameterized condition pattern owned by the external template catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub id: TemplateId,
    pub template_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition_rule: ConditionRuleHint,
    #[serde(default)]
    pub parameters: TemplateParameters,
}

impl PolicyTemplate {
    pub fn param_spec(&self, key: &str) -> Option<&ParamSpec> {
        self.parameters.configurable_values.get(key)
    }

    /// Parameter values seeded from the declared defaults.
    pub fn default_parameters(&self) -> BTreeMap<String, serde_json::Value> {
        self.parameters
            .configurable_values
            .iter()
            .filter_map(|(key, spec)| spec.default.clone().map(|v| (key.clone(), v)))
            .collect()
    }
}

/// Body sent to the external combination service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinationRequest {
    pub template_ids: Vec<TemplateId>,
    pub operator: LogicalOperator,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// The combined tree arrives untrusted and goes through the normalizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinationResponse {
    pub condition: serde_json::Value,
}

pub fn parameter_wire_key(template_id: TemplateId, param_key: &str) -> String {
    format!("{template_id}_{param_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_deserialization() {
        let raw = json!({
            "id": 4,
            "template_code": "department_restriction",
            "condition_rule": {"field": "user.department_id"},
            "parameters": {"configurable_values": {
                "restriction_type": {"type": "select", "label": "Mode", "default": "in"},
                "department_ids": {"type": "department_selection", "label": "Departments"}
            }}
        });

        let template: PolicyTemplate = serde_json::from_value(raw).unwrap();
        assert_eq!(template.id, 4);
        assert_eq!(
            template.condition_rule.field.as_deref(),
            Some("user.department_id")
        );
        assert_eq!(
            template.param_spec("department_ids").unwrap().kind,
            ParamInputKind::DepartmentSelection
        );
        assert_eq!(
            template.default_parameters().get("restriction_type"),
            Some(&json!("in"))
        );
    }

    #[test]
    fn test_parameter_wire_key() {
        assert_eq!(parameter_wire_key(12, "amount_limit"), "12_amount_limit");
    }
}
