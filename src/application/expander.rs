//! Dissolves legacy `user.access_restriction` wrappers into their parent's children.

use crate::domain::condition::{ConditionNode, Group, LogicalOperator};

/// Expands every wrapper at any depth, then collapses a root whose sole child is an `and` group.
pub fn expand_access_restrictions(node: ConditionNode) -> ConditionNode {
    let expanded = match node {
        ConditionNode::Group(group) => {
            ConditionNode::Group(Group::new(group.operator, expand_children(group.rules)))
        }
        // A wrapper at the root has no parent to splice into; it becomes the root group.
        ConditionNode::AccessRestriction(wrapper) => {
            ConditionNode::Group(Group::new(wrapper.operator, expand_children(wrapper.rules)))
        }
        rule @ ConditionNode::Rule(_) => rule,
    };
    collapse_root(expanded)
}

fn expand_children(children: Vec<ConditionNode>) -> Vec<ConditionNode> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        match child {
            ConditionNode::AccessRestriction(wrapper) => out.extend(expand_children(wrapper.rules)),
            ConditionNode::Group(group) => out.push(ConditionNode::Group(Group::new(
                group.operator,
                expand_children(group.rules),
            ))),
            rule @ ConditionNode::Rule(_) => out.push(rule),
        }
    }
    out
}

/// Root-only: `{op, [ {and, xs} ]}` becomes `{and, xs}`. Nested levels are left alone.
pub fn collapse_root(node: ConditionNode) -> ConditionNode {
    let ConditionNode::Group(mut root) = node else {
        return node;
    };
    // Repeats at the root until no single `and` child remains, so a second pass is a no-op.
    while let [ConditionNode::Group(only)] = root.rules.as_slice() {
        if only.operator != LogicalOperator::And {
            break;
        }
        let Some(ConditionNode::Group(only)) = root.rules.pop() else {
            break;
        };
        root = Group::new(LogicalOperator::And, only.rules);
    }
    ConditionNode::Group(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{AccessRestriction, Operator, Scalar};

    fn dept_eq(id: i64) -> ConditionNode {
        ConditionNode::rule("user.department_id", Operator::Eq, Scalar::from(id))
    }

    fn wrapper(operator: LogicalOperator, rules: Vec<ConditionNode>) -> ConditionNode {
        ConditionNode::AccessRestriction(AccessRestriction { operator, rules })
    }

    #[test]
    fn test_single_wrapper_is_spliced() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![wrapper(LogicalOperator::And, vec![dept_eq(3)])],
        );
        assert_eq!(
            expand_access_restrictions(tree),
            ConditionNode::group(LogicalOperator::And, vec![dept_eq(3)])
        );
    }

    #[test]
    fn test_splice_keeps_position_and_recurses_into_double_wrapping() {
        let amount = ConditionNode::rule("data.amount", Operator::Lte, Scalar::from(10));
        let tree = ConditionNode::group(
            LogicalOperator::Or,
            vec![
                amount.clone(),
                wrapper(
                    LogicalOperator::Or,
                    vec![dept_eq(1), wrapper(LogicalOperator::And, vec![dept_eq(2)])],
                ),
                dept_eq(9),
            ],
        );
        assert_eq!(
            expand_access_restrictions(tree),
            ConditionNode::group(
                LogicalOperator::Or,
                vec![amount, dept_eq(1), dept_eq(2), dept_eq(9)]
            )
        );
    }

    #[test]
    fn test_wrappers_inside_ordinary_groups_are_expanded() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![
                dept_eq(1),
                ConditionNode::group(
                    LogicalOperator::Or,
                    vec![wrapper(LogicalOperator::And, vec![dept_eq(5), dept_eq(6)])],
                ),
            ],
        );
        let expanded = expand_access_restrictions(tree);
        assert!(!expanded.contains_access_restriction());
        assert_eq!(
            expanded,
            ConditionNode::group(
                LogicalOperator::And,
                vec![
                    dept_eq(1),
                    ConditionNode::group(LogicalOperator::Or, vec![dept_eq(5), dept_eq(6)]),
                ],
            )
        );
    }

    #[test]
    fn test_root_collapse_only_at_top_level() {
        let nested = ConditionNode::group(
            LogicalOperator::And,
            vec![ConditionNode::group(LogicalOperator::And, vec![dept_eq(1)])],
        );
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![ConditionNode::group(
                LogicalOperator::And,
                vec![dept_eq(2), nested.clone()],
            )],
        );
        assert_eq!(
            expand_access_restrictions(tree),
            ConditionNode::group(LogicalOperator::And, vec![dept_eq(2), nested])
        );
    }

    #[test]
    fn test_or_child_is_not_collapsed() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![ConditionNode::group(LogicalOperator::Or, vec![dept_eq(1), dept_eq(2)])],
        );
        assert_eq!(expand_access_restrictions(tree.clone()), tree);
    }

    #[test]
    fn test_fixpoint() {
        let tree = ConditionNode::group(
            LogicalOperator::And,
            vec![ConditionNode::group(
                LogicalOperator::And,
                vec![ConditionNode::group(
                    LogicalOperator::And,
                    vec![wrapper(LogicalOperator::And, vec![dept_eq(4)])],
                )],
            )],
        );
        let once = expand_access_restrictions(tree);
        assert_eq!(expand_access_restrictions(once.clone()), once);
        assert_eq!(once, ConditionNode::group(LogicalOperator::And, vec![dept_eq(4)]));
    }
}
