//! Canonicalizes loosely shaped condition JSON.
//!
//! This is the only place where untyped input becomes a [`ConditionNode`]:
//! request bodies, persisted policies, pasted text and combination-service
//! responses all pass through [`normalize_value`]. Everything downstream
//! works on the strict tree.

use crate::domain::condition::{
    ACCESS_RESTRICTION_FIELD, AccessRestriction, ConditionNode, Group, LogicalOperator, Operator,
    Rule, RuleValue,
};
use serde_json::{Map, Value};

/// Normalizes an arbitrary JSON value into a root group.
pub fn normalize_value(raw: &Value) -> ConditionNode {
    normalize(normalize_node(raw).unwrap_or_default())
}

/// Ensures the root of a strict tree is a group.
pub fn normalize(node: ConditionNode) -> ConditionNode {
    match node {
        ConditionNode::Group(group) => ConditionNode::Group(group),
        other => ConditionNode::Group(Group::new(LogicalOperator::And, vec![other])),
    }
}

fn normalize_node(raw: &Value) -> Option<ConditionNode> {
    let obj = raw.as_object()?;
    let logical = obj
        .get("operator")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<LogicalOperator>().ok());

    if let Some(field) = obj.get("field") {
        let field = field.as_str().unwrap_or_default().trim().to_string();
        if field == ACCESS_RESTRICTION_FIELD {
            if let Some(operator) = logical {
                let nested = obj
                    .get("rules")
                    .or_else(|| obj.get("value").filter(|v| v.is_array() || v.is_object()));
                return Some(ConditionNode::AccessRestriction(AccessRestriction {
                    operator,
                    rules: normalize_rules(nested),
                }));
            }
        }
        return Some(ConditionNode::Rule(normalize_rule(field, obj)));
    }

    if obj.contains_key("rules") || logical.is_some() {
        return Some(ConditionNode::Group(Group::new(
            logical.unwrap_or_default(),
            normalize_rules(obj.get("rules")),
        )));
    }

    Some(ConditionNode::Rule(normalize_rule(String::new(), obj)))
}

fn normalize_rule(field: String, obj: &Map<String, Value>) -> Rule {
    let operator = obj
        .get("operator")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Operator>().ok());
    let value = obj.get("value").map(RuleValue::from_json).unwrap_or_default();
    Rule {
        field,
        operator,
        value,
    }
}

/// Accepts a sequence, or a keyed object standing in for one. Anything else is corrupt.
fn normalize_rules(raw: Option<&Value>) -> Vec<ConditionNode> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(normalize_node).collect(),
        Some(Value::Object(keyed)) => ordered_values(keyed)
            .into_iter()
            .filter_map(normalize_node)
            .collect(),
        _ => vec![],
    }
}

/// Integer-like keys first in numeric order, then the remaining keys.
fn ordered_values(keyed: &Map<String, Value>) -> Vec<&Value> {
    let mut indexed: Vec<(u64, &Value)> = vec![];
    let mut named: Vec<&Value> = vec![];
    for (key, value) in keyed {
        match key.parse::<u64>() {
            Ok(index) if index.to_string() == *key => indexed.push((index, value)),
            _ => named.push(value),
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, v)| v).chain(named).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::Scalar;
    use serde_json::json;

    #[test]
    fn test_keyed_object_rules_become_sequence() {
        let raw = json!({
            "operator": "or",
            "rules": {
                "10": {"field": "data.amount", "operator": "gt", "value": 3},
                "2": {"field": "user.id", "operator": "eq", "value": 1},
            }
        });

        let node = normalize_value(&raw);
        let group = node.as_group().unwrap();
        assert_eq!(group.operator, LogicalOperator::Or);
        assert_eq!(
            group.rules,
            vec![
                ConditionNode::rule("user.id", Operator::Eq, Scalar::from(1)),
                ConditionNode::rule("data.amount", Operator::Gt, Scalar::from(3)),
            ]
        );
    }

    #[test]
    fn test_nested_keyed_rules_are_normalized_at_depth() {
        let raw = json!({
            "operator": "and",
            "rules": [{"operator": "or", "rules": {"0": {"operator": "and", "rules": {"0": {"field": "user.id", "operator": "eq", "value": 2}}}}}]
        });

        let node = normalize_value(&raw);
        let inner = node.as_group().unwrap().rules[0].as_group().unwrap();
        let innermost = inner.rules[0].as_group().unwrap();
        assert_eq!(innermost.rules.len(), 1);
    }

    #[test]
    fn test_corrupt_rules_become_empty() {
        let node = normalize_value(&json!({"operator": "and", "rules": "broken"}));
        assert_eq!(node, ConditionNode::Group(Group::empty()));

        let node = normalize_value(&json!(42));
        assert_eq!(node, ConditionNode::Group(Group::empty()));
    }

    #[test]
    fn test_bare_rule_root_is_wrapped() {
        let node = normalize_value(&json!({"field": "user.id", "operator": "eq", "value": 9}));
        assert_eq!(
            node,
            ConditionNode::group(
                LogicalOperator::And,
                vec![ConditionNode::rule("user.id", Operator::Eq, Scalar::from(9))]
            )
        );
    }

    #[test]
    fn test_legacy_wrapper_is_recognized() {
        let raw = json!({
            "operator": "and",
            "rules": [{
                "field": "user.access_restriction",
                "operator": "and",
                "rules": [{"field": "user.department_id", "operator": "eq", "value": 3}]
            }]
        });

        let node = normalize_value(&raw);
        match &node.as_group().unwrap().rules[0] {
            ConditionNode::AccessRestriction(w) => assert_eq!(w.rules.len(), 1),
            other => panic!("expected wrapper, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_operator_is_unset() {
        let node = normalize_value(&json!({"rules": [{"field": "user.id", "operator": "between", "value": 1}]}));
        match &node.as_group().unwrap().rules[0] {
            ConditionNode::Rule(r) => assert!(r.operator.is_none()),
            other => panic!("expected rule, got {other:?}"),
        }
    }

    #[test]
    fn test_idempotent() {
        let inputs = vec![
            json!({"operator": "or", "rules": {"1": {"field": 5}, "0": {"operator": "and"}}}),
            json!({"rules": [{"field": "user.access_restriction", "operator": "or", "value": [{"field": "user.id", "operator": "in", "value": ["1", null, {"x": 1}]}]}]}),
            json!({"field": "data.amount", "operator": "lte", "value": null}),
            json!([1, 2, 3]),
        ];
        for raw in inputs {
            let once = normalize_value(&raw);
            let twice = normalize_value(&once.to_json());
            assert_eq!(once, twice, "not idempotent for {raw}");
            assert_eq!(normalize(once.clone()), once);
        }
    }
}
