use policy_condition_service::application::serialization::{parse_text, to_pretty_text, to_text};
use policy_condition_service::application::services::{ConditionError, ConditionPipeline};
use policy_condition_service::domain::condition::{
    ConditionNode, LogicalOperator, Operator, RuleValue, Scalar,
};
use policy_condition_service::test_utils::legacy_condition_json;
use serde_json::json;

fn pipeline() -> ConditionPipeline {
    ConditionPipeline::default()
}

#[test]
fn test_membership_values_are_coerced_element_wise() {
    let outcome = pipeline().run_value(&json!({
        "operator": "and",
        "rules": [{"field": "user.department_id", "operator": "in", "value": ["3", "5", "x"]}]
    }));

    let expected = ConditionNode::group(
        LogicalOperator::And,
        vec![ConditionNode::rule(
            "user.department_id",
            Operator::In,
            RuleValue::List(vec![Scalar::from(3), Scalar::from(5), Scalar::from("x")]),
        )],
    );
    assert_eq!(outcome.tree, expected);
    assert!(outcome.has_valid_rule);
}

#[test]
fn test_single_valued_operators_take_the_first_element() {
    let outcome = pipeline().run_value(&json!({
        "operator": "and",
        "rules": [
            {"field": "data.amount", "operator": "gte", "value": ["100", "200"]},
            {"field": "user.system_level", "operator": "lte", "value": "3"}
        ]
    }));

    let group = outcome.tree.as_group().unwrap();
    assert_eq!(
        group.rules,
        vec![
            ConditionNode::rule("data.amount", Operator::Gte, Scalar::from(100)),
            ConditionNode::rule("user.system_level", Operator::Lte, Scalar::from(3)),
        ]
    );
}

#[test]
fn test_scalar_membership_value_becomes_a_list() {
    let outcome = pipeline().run_value(&json!({
        "operator": "and",
        "rules": [{"field": "user.role_id", "operator": "not_in", "value": "2"}]
    }));
    assert_eq!(
        outcome.tree.as_group().unwrap().rules,
        vec![ConditionNode::rule("user.role_id", Operator::NotIn, vec![2])]
    );
}

#[test]
fn test_pipeline_is_idempotent() {
    let pipeline = pipeline();
    let inputs = [
        legacy_condition_json(),
        json!({"operator": "or", "rules": {"1": {"field": "data.status", "operator": "eq", "value": "open"},
                                            "0": {"field": "data.amount", "operator": "gt", "value": "10.5"}}}),
        json!({"field": "user.id", "operator": "eq", "value": "7"}),
        json!({"operator": "and", "rules": [{"operator": "and", "rules": [{"operator": "or", "rules": []}]}]}),
    ];

    for raw in inputs {
        let once = pipeline.run_value(&raw);
        let twice = pipeline.run_value(&once.tree.to_json());
        assert_eq!(once, twice, "input: {raw}");
        assert!(!twice.tree.contains_access_restriction());
    }
}

#[test]
fn test_incomplete_rules_and_empty_groups_are_pruned() {
    let outcome = pipeline().run_value(&json!({
        "operator": "and",
        "rules": [
            {"field": "", "operator": "eq", "value": 1},
            {"field": "data.amount", "value": 10},
            {"field": "user.department_id", "operator": "in", "value": []},
            {"field": "data.status", "operator": "between", "value": "x"},
            {"operator": "or", "rules": [{"field": "user.id", "operator": "in", "value": ""}]},
            {"field": "data.status", "operator": "eq", "value": "open"}
        ]
    }));

    assert_eq!(
        outcome.tree,
        ConditionNode::group(
            LogicalOperator::And,
            vec![ConditionNode::rule("data.status", Operator::Eq, Scalar::from("open"))]
        )
    );
    assert!(outcome.has_valid_rule);
}

#[test]
fn test_fully_incomplete_tree_keeps_an_empty_root() {
    let outcome = pipeline().run_value(&json!({
        "operator": "or",
        "rules": [
            {"field": "user.id"},
            {"field": "user.role_id", "operator": "in"},
            {"operator": "and", "rules": []}
        ]
    }));
    assert!(!outcome.has_valid_rule);
    let root = outcome.tree.as_group().unwrap();
    assert!(root.rules.is_empty());
}

#[test]
fn test_missing_value_under_eq_compares_against_empty_string() {
    let outcome = pipeline().run_value(&json!({
        "operator": "or",
        "rules": [{"field": "user.id", "operator": "eq"}]
    }));
    assert!(outcome.has_valid_rule);
    assert_eq!(
        outcome.tree.as_group().unwrap().rules,
        vec![ConditionNode::rule("user.id", Operator::Eq, Scalar::from(""))]
    );
}

#[test]
fn test_legacy_policy_is_expanded_and_coerced() {
    let outcome = pipeline().run_value(&legacy_condition_json());

    let expected = ConditionNode::group(
        LogicalOperator::And,
        vec![
            ConditionNode::rule("user.department_id", Operator::In, vec![3, 5]),
            ConditionNode::rule("user.system_level", Operator::Gte, Scalar::from(2)),
            ConditionNode::rule("data.amount", Operator::Lte, Scalar::from(500000)),
        ],
    );
    assert_eq!(outcome.tree, expected);
    assert_eq!(outcome.tree.complete_rule_count(), 3);
}

#[test]
fn test_root_with_single_and_group_is_collapsed() {
    let outcome = pipeline().run_value(&json!({
        "operator": "or",
        "rules": [{"operator": "and", "rules": [
            {"field": "user.id", "operator": "eq", "value": 1},
            {"field": "data.amount", "operator": "lt", "value": 5}
        ]}]
    }));

    assert_eq!(
        outcome.tree,
        ConditionNode::group(
            LogicalOperator::And,
            vec![
                ConditionNode::rule("user.id", Operator::Eq, Scalar::from(1)),
                ConditionNode::rule("data.amount", Operator::Lt, Scalar::from(5)),
            ]
        )
    );
}

#[test]
fn test_single_or_child_is_not_collapsed() {
    let raw = json!({
        "operator": "and",
        "rules": [{"operator": "or", "rules": [
            {"field": "user.id", "operator": "eq", "value": 1},
            {"field": "user.id", "operator": "eq", "value": 2}
        ]}]
    });
    let outcome = pipeline().run_value(&raw);
    let root = outcome.tree.as_group().unwrap();
    assert_eq!(root.rules.len(), 1);
    assert_eq!(root.rules[0].as_group().unwrap().operator, LogicalOperator::Or);
}

#[test]
fn test_text_round_trip() {
    let pipeline = pipeline();
    let tree = pipeline.run_value(&legacy_condition_json()).tree;

    for text in [to_text(&tree).unwrap(), to_pretty_text(&tree).unwrap()] {
        let parsed = parse_text(&text, &pipeline).unwrap();
        assert_eq!(parsed.tree, tree);
    }
}

#[test]
fn test_round_trip_when_pruning_leaves_a_single_and_child() {
    let pipeline = pipeline();
    let tree = pipeline
        .run_value(&json!({
            "operator": "and",
            "rules": [
                {"operator": "and", "rules": [
                    {"field": "user.id", "operator": "eq", "value": 1},
                    {"field": "data.amount", "operator": "lt", "value": 5}
                ]},
                {"operator": "or", "rules": [{"field": "user.role_id", "operator": "in", "value": []}]}
            ]
        }))
        .tree;

    assert_eq!(
        tree,
        ConditionNode::group(
            LogicalOperator::And,
            vec![
                ConditionNode::rule("user.id", Operator::Eq, Scalar::from(1)),
                ConditionNode::rule("data.amount", Operator::Lt, Scalar::from(5)),
            ]
        )
    );
    let again = parse_text(&to_text(&tree).unwrap(), &pipeline).unwrap().tree;
    assert_eq!(again, tree);
}

#[test]
fn test_serialized_text_matches_the_wire_shape() {
    let tree = ConditionNode::group(
        LogicalOperator::And,
        vec![ConditionNode::rule("data.amount", Operator::Lte, Scalar::from(500000))],
    );
    assert_eq!(
        to_text(&tree).unwrap(),
        r#"{"operator":"and","rules":[{"field":"data.amount","operator":"lte","value":500000}]}"#
    );
}

#[test]
fn test_unparseable_text_is_rejected() {
    let pipeline = pipeline();
    for text in ["{not json", "[1, 2]", "\"and\"", ""] {
        let err = parse_text(text, &pipeline).unwrap_err();
        assert!(matches!(err, ConditionError::Unparseable(_)), "text: {text:?}");
    }
}
