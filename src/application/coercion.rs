use crate::domain::attribute::{AttributeCatalog, ValueType};
use crate::domain::condition::{ConditionNode, Operator, Rule, RuleValue, Scalar};

/// Parses a numeric-looking string into a JSON number. Blank strings and
/// non-finite values are not numbers.
pub fn parse_number(raw: &str) -> Option<serde_json::Number> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i.into());
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
}

/// Strings become numbers when they parse cleanly; everything else is kept.
pub fn coerce_scalar(value: Scalar) -> Scalar {
    match value {
        Scalar::String(s) => match parse_number(&s) {
            Some(n) => Scalar::Number(n),
            None => Scalar::String(s),
        },
        other => other,
    }
}

/// Makes `value` consistent with the arity and type expected by `operator`.
pub fn coerce_value(
    operator: Option<Operator>,
    value: RuleValue,
    value_type: Option<ValueType>,
) -> RuleValue {
    match operator {
        Some(op) if op.is_single_valued() => {
            let scalar = match value {
                RuleValue::List(items) => items.into_iter().next().unwrap_or(Scalar::String(String::new())),
                RuleValue::Scalar(s) => s,
            };
            RuleValue::Scalar(coerce_scalar(scalar))
        }
        Some(op) if op.is_membership() => match value {
            RuleValue::List(items) => RuleValue::List(items.into_iter().map(coerce_scalar).collect()),
            RuleValue::Scalar(s) if s.is_blank() => RuleValue::List(vec![]),
            RuleValue::Scalar(s) => RuleValue::List(vec![coerce_scalar(s)]),
        },
        _ if value_type == Some(ValueType::Number) => match value {
            RuleValue::Scalar(s) => RuleValue::Scalar(coerce_scalar(s)),
            RuleValue::List(items) => RuleValue::List(items.into_iter().map(coerce_scalar).collect()),
        },
        _ => value,
    }
}

pub fn coerce_rule(rule: Rule, catalog: &AttributeCatalog) -> Rule {
    let value_type = catalog.value_type_of(&rule.field);
    Rule {
        value: coerce_value(rule.operator, rule.value, value_type),
        ..rule
    }
}

/// Applies rule coercion at every depth.
pub fn coerce_tree(node: ConditionNode, catalog: &AttributeCatalog) -> ConditionNode {
    match node {
        ConditionNode::Rule(rule) => ConditionNode::Rule(coerce_rule(rule, catalog)),
        ConditionNode::Group(mut group) => {
            group.rules = group
                .rules
                .into_iter()
                .map(|child| coerce_tree(child, catalog))
                .collect();
            ConditionNode::Group(group)
        }
        ConditionNode::AccessRestriction(mut wrapper) => {
            wrapper.rules = wrapper
                .rules
                .into_iter()
                .map(|child| coerce_tree(child, catalog))
                .collect();
            ConditionNode::AccessRestriction(wrapper)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Scalar {
        Scalar::from(v)
    }

    #[test]
    fn test_membership_elements_become_numbers_when_numeric() {
        let coerced = coerce_value(
            Some(Operator::In),
            RuleValue::List(vec![s("3"), s("5"), s("x")]),
            None,
        );
        assert_eq!(
            coerced,
            RuleValue::List(vec![Scalar::from(3), Scalar::from(5), s("x")])
        );
    }

    #[test]
    fn test_membership_wraps_scalars() {
        assert_eq!(
            coerce_value(Some(Operator::NotIn), RuleValue::Scalar(s("12")), None),
            RuleValue::List(vec![Scalar::from(12)])
        );
        assert_eq!(
            coerce_value(Some(Operator::In), RuleValue::default(), None),
            RuleValue::List(vec![])
        );
    }

    #[test]
    fn test_gte_takes_first_element_and_parses() {
        assert_eq!(
            coerce_value(Some(Operator::Gte), RuleValue::List(vec![s("42")]), None),
            RuleValue::Scalar(Scalar::from(42))
        );
        assert_eq!(
            coerce_value(Some(Operator::Lte), RuleValue::Scalar(s("09:30")), None),
            RuleValue::Scalar(s("09:30"))
        );
        assert_eq!(
            coerce_value(Some(Operator::Lte), RuleValue::Scalar(s("2.5")), None),
            RuleValue::Scalar(Scalar::Number(serde_json::Number::from_f64(2.5).unwrap()))
        );
    }

    #[test]
    fn test_other_operators_coerce_only_numeric_attributes() {
        assert_eq!(
            coerce_value(Some(Operator::Eq), RuleValue::Scalar(s("7")), Some(ValueType::Number)),
            RuleValue::Scalar(Scalar::from(7))
        );
        assert_eq!(
            coerce_value(Some(Operator::Eq), RuleValue::Scalar(s("7")), Some(ValueType::String)),
            RuleValue::Scalar(s("7"))
        );
        assert_eq!(
            coerce_value(Some(Operator::Contains), RuleValue::Scalar(s("abc")), Some(ValueType::Number)),
            RuleValue::Scalar(s("abc"))
        );
    }

    #[test]
    fn test_parse_number_rejects_blank_and_non_finite() {
        assert!(parse_number("").is_none());
        assert!(parse_number("   ").is_none());
        assert!(parse_number("inf").is_none());
        assert!(parse_number("NaN").is_none());
        assert_eq!(parse_number(" 15 "), Some(15.into()));
        assert_eq!(parse_number("-4"), Some((-4).into()));
    }

    #[test]
    fn test_coerce_tree_uses_catalog_types() {
        let catalog = AttributeCatalog::default();
        let tree = ConditionNode::group(
            Default::default(),
            vec![
                ConditionNode::rule("user.department_id", Operator::Eq, s("3")),
                ConditionNode::rule("data.status", Operator::Eq, s("3")),
            ],
        );
        let coerced = coerce_tree(tree, &catalog);
        let rules = &coerced.as_group().unwrap().rules;
        assert_eq!(rules[0], ConditionNode::rule("user.department_id", Operator::Eq, Scalar::from(3)));
        assert_eq!(rules[1], ConditionNode::rule("data.status", Operator::Eq, s("3")));
    }
}
