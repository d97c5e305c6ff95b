use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Sentinel field used by older policies to smuggle a nested group inside a rule.
pub const ACCESS_RESTRICTION_FIELD: &str = "user.access_restriction";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Exists,
}

impl Operator {
    pub const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::In,
        Operator::NotIn,
        Operator::Exists,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Exists => "exists",
        }
    }

    /// `in` / `not_in` take a list of candidates.
    pub fn is_membership(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// `gte` / `lte` always compare against a single scalar.
    pub fn is_single_valued(self) -> bool {
        matches!(self, Operator::Gte | Operator::Lte)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(code))
            .ok_or_else(|| format!("unknown operator: {code}"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(LogicalOperator::And),
            "or" => Ok(LogicalOperator::Or),
            other => Err(format!("unknown logical operator: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl Scalar {
    pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => Some(Scalar::Number(n.clone())),
            serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Number(n) => serde_json::Value::Number(n.clone()),
            Scalar::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Scalar::String(s) if s.trim().is_empty())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RuleValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl Default for RuleValue {
    fn default() -> Self {
        RuleValue::Scalar(Scalar::String(String::new()))
    }
}

impl RuleValue {
    pub fn from_json(value: &serde_json::Value) -> RuleValue {
        match value {
            serde_json::Value::Array(items) => {
                RuleValue::List(items.iter().filter_map(Scalar::from_json).collect())
            }
            other => Scalar::from_json(other)
                .map(RuleValue::Scalar)
                .unwrap_or_default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RuleValue::Scalar(s) => s.to_json(),
            RuleValue::List(items) => {
                serde_json::Value::Array(items.iter().map(Scalar::to_json).collect())
            }
        }
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, RuleValue::List(items) if items.is_empty())
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for RuleValue {
    fn from(items: Vec<T>) -> Self {
        RuleValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Scalar> for RuleValue {
    fn from(value: Scalar) -> Self {
        RuleValue::Scalar(value)
    }
}

/// A single attribute comparison.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Rule {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    pub value: RuleValue,
}

impl Rule {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<RuleValue>) -> Self {
        Self {
            field: field.into(),
            operator: Some(operator),
            value: value.into(),
        }
    }

    /// Field and operator are set, and membership operators carry at least one candidate.
    pub fn is_complete(&self) -> bool {
        let Some(operator) = self.operator else {
            return false;
        };
        if self.field.trim().is_empty() {
            return false;
        }
        !(operator.is_membership() && !matches!(&self.value, RuleValue::List(v) if !v.is_empty()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Group {
    pub operator: LogicalOperator,
    pub rules: Vec<ConditionNode>,
}

impl Group {
    pub fn new(operator: LogicalOperator, rules: Vec<ConditionNode>) -> Self {
        Self { operator, rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Legacy `user.access_restriction` wrapper: a rule-shaped node holding a nested rule list.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessRestriction {
    pub operator: LogicalOperator,
    pub rules: Vec<ConditionNode>,
}

impl Serialize for AccessRestriction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("field", ACCESS_RESTRICTION_FIELD)?;
        map.serialize_entry("operator", &self.operator)?;
        map.serialize_entry("rules", &self.rules)?;
        map.end()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Rule(Rule),
    Group(Group),
    AccessRestriction(AccessRestriction),
}

impl Default for ConditionNode {
    fn default() -> Self {
        ConditionNode::Group(Group::empty())
    }
}

impl ConditionNode {
    pub fn rule(field: impl Into<String>, operator: Operator, value: impl Into<RuleValue>) -> Self {
        ConditionNode::Rule(Rule::new(field, operator, value))
    }

    pub fn group(operator: LogicalOperator, rules: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(Group::new(operator, rules))
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            ConditionNode::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut Group> {
        match self {
            ConditionNode::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Number of complete rules anywhere below (and including) this node.
    pub fn complete_rule_count(&self) -> usize {
        match self {
            ConditionNode::Rule(r) => usize::from(r.is_complete()),
            ConditionNode::Group(g) => g.rules.iter().map(Self::complete_rule_count).sum(),
            ConditionNode::AccessRestriction(w) => {
                w.rules.iter().map(Self::complete_rule_count).sum()
            }
        }
    }

    pub fn contains_access_restriction(&self) -> bool {
        match self {
            ConditionNode::Rule(_) => false,
            ConditionNode::Group(g) => g.rules.iter().any(Self::contains_access_restriction),
            ConditionNode::AccessRestriction(_) => true,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_parsing() {
        assert_eq!("not_in".parse::<Operator>(), Ok(Operator::NotIn));
        assert_eq!("GTE".parse::<Operator>(), Ok(Operator::Gte));
        assert!("between".parse::<Operator>().is_err());
        assert_eq!(" Or ".parse::<LogicalOperator>(), Ok(LogicalOperator::Or));
    }

    #[test]
    fn test_rule_completeness() {
        assert!(Rule::new("data.amount", Operator::Gte, Scalar::from(100)).is_complete());
        assert!(!Rule::new("", Operator::Eq, Scalar::from(1)).is_complete());
        assert!(!Rule::default().is_complete());
        assert!(!Rule::new("user.department_id", Operator::In, Vec::<i64>::new()).is_complete());
        assert!(!Rule::new("user.department_id", Operator::In, Scalar::from(3)).is_complete());
        assert!(Rule::new("user.department_id", Operator::In, vec![3]).is_complete());
    }

    #[test]
    fn test_serialized_shapes() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![
                ConditionNode::rule("data.amount", Operator::Lte, Scalar::from(500000)),
                ConditionNode::AccessRestriction(AccessRestriction {
                    operator: LogicalOperator::Or,
                    rules: vec![ConditionNode::rule("user.id", Operator::Eq, Scalar::from(7))],
                }),
                ConditionNode::Rule(Rule::default()),
            ],
        );

        assert_eq!(
            tree.to_json(),
            json!({
                "operator": "and",
                "rules": [
                    {"field": "data.amount", "operator": "lte", "value": 500000},
                    {"field": "user.access_restriction", "operator": "or", "rules": [
                        {"field": "user.id", "operator": "eq", "value": 7}
                    ]},
                    {"field": "", "value": ""}
                ]
            })
        );
        assert!(tree.contains_access_restriction());
        assert_eq!(tree.complete_rule_count(), 2);
    }
}
