use super::condition::Operator;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

impl ValueType {
    /// Operators the evaluator accepts for attributes of this type.
    pub fn operators(self) -> &'static [Operator] {
        match self {
            ValueType::String => &[
                Operator::Eq,
                Operator::Ne,
                Operator::Contains,
                Operator::NotContains,
                Operator::StartsWith,
                Operator::EndsWith,
                Operator::In,
                Operator::NotIn,
                Operator::Exists,
            ],
            ValueType::Number => &[
                Operator::Eq,
                Operator::Ne,
                Operator::Gt,
                Operator::Gte,
                Operator::Lt,
                Operator::Lte,
                Operator::In,
                Operator::NotIn,
                Operator::Exists,
            ],
            ValueType::Boolean => &[Operator::Eq, Operator::Ne, Operator::Exists],
        }
    }

    pub fn allows(self, operator: Operator) -> bool {
        self.operators().contains(&operator)
    }
}

/// Where the selectable values of an attribute come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSource {
    Departments,
    Positions,
    SystemLevels,
    Roles,
    Users,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub key: String,
    pub label: String,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_source: Option<OptionSource>,
}

impl AttributeDefinition {
    fn new(key: &str, label: &str, value_type: ValueType, option_source: Option<OptionSource>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value_type,
            option_source,
        }
    }
}

/// `{value, label}` pair used to populate selection inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeOption {
    pub value: serde_json::Value,
    pub label: String,
}

static DEFAULT_ATTRIBUTES: Lazy<Vec<AttributeDefinition>> = Lazy::new(|| {
    use OptionSource::*;
    use ValueType::*;
    vec![
        AttributeDefinition::new("user.id", "User", Number, Some(Users)),
        AttributeDefinition::new("user.department_id", "User department", Number, Some(Departments)),
        AttributeDefinition::new("user.position_id", "User position", Number, Some(Positions)),
        AttributeDefinition::new("user.system_level", "User system level", Number, Some(SystemLevels)),
        AttributeDefinition::new("user.role_id", "User role", Number, Some(Roles)),
        AttributeDefinition::new("user.is_active", "User is active", Boolean, None),
        AttributeDefinition::new("data.amount", "Amount", Number, None),
        AttributeDefinition::new("data.status", "Status", String, None),
        AttributeDefinition::new("data.created_by", "Created by", Number, Some(Users)),
        AttributeDefinition::new("data.department_id", "Owning department", Number, Some(Departments)),
        AttributeDefinition::new("environment.time", "Time of day", String, None),
        AttributeDefinition::new("environment.date", "Date", String, None),
        AttributeDefinition::new("environment.ip_address", "IP address", String, None),
    ]
});

/// Attribute vocabulary shared with the external evaluator.
#[derive(Clone, Debug)]
pub struct AttributeCatalog {
    attributes: Vec<AttributeDefinition>,
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self {
            attributes: DEFAULT_ATTRIBUTES.clone(),
        }
    }
}

impl AttributeCatalog {
    pub fn new(attributes: Vec<AttributeDefinition>) -> Self {
        Self { attributes }
    }

    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    pub fn lookup(&self, key: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn value_type_of(&self, key: &str) -> Option<ValueType> {
        self.lookup(key).map(|a| a.value_type)
    }

    /// Unknown attributes are not restricted; the evaluator decides.
    pub fn is_operator_allowed(&self, key: &str, operator: Operator) -> bool {
        self.value_type_of(key)
            .map(|t| t.allows(operator))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_legality_by_type() {
        let catalog = AttributeCatalog::default();
        assert!(catalog.is_operator_allowed("data.amount", Operator::Lte));
        assert!(!catalog.is_operator_allowed("data.amount", Operator::Contains));
        assert!(catalog.is_operator_allowed("data.status", Operator::StartsWith));
        assert!(!catalog.is_operator_allowed("user.is_active", Operator::In));
        assert!(catalog.is_operator_allowed("custom.attribute", Operator::Gt));
    }

    #[test]
    fn test_lookup() {
        let catalog = AttributeCatalog::default();
        let dept = catalog.lookup("user.department_id").unwrap();
        assert_eq!(dept.value_type, ValueType::Number);
        assert_eq!(dept.option_source, Some(OptionSource::Departments));
        assert!(catalog.lookup("user.access_restriction").is_none());
    }
}
