use crate::application::services::{ConditionError, ConditionPipeline};
use crate::application::validators::PruneOutcome;
use crate::domain::condition::ConditionNode;

/// Compact text used for persistence payloads.
pub fn to_text(node: &ConditionNode) -> Result<String, ConditionError> {
    serde_json::to_string(node).map_err(ConditionError::Serialization)
}

/// Indented text used for preview and clipboard copy.
pub fn to_pretty_text(node: &ConditionNode) -> Result<String, ConditionError> {
    serde_json::to_string_pretty(node).map_err(ConditionError::Serialization)
}

/// Parses pasted text and runs it through the full pipeline.
/// Unparseable text is rejected; nothing is partially adopted.
pub fn parse_text(text: &str, pipeline: &ConditionPipeline) -> Result<PruneOutcome, ConditionError> {
    let raw: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| ConditionError::Unparseable(e.to_string()))?;
    if !raw.is_object() {
        return Err(ConditionError::Unparseable(
            "condition text must be a JSON object".to_string(),
        ));
    }
    Ok(pipeline.run_value(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{LogicalOperator, Operator, Scalar};

    #[test]
    fn test_round_trip() {
        let pipeline = ConditionPipeline::default();
        let tree = ConditionNode::group(
            LogicalOperator::Or,
            vec![
                ConditionNode::rule("data.amount", Operator::Lte, Scalar::from(500000)),
                ConditionNode::group(
                    LogicalOperator::And,
                    vec![
                        ConditionNode::rule("user.department_id", Operator::In, vec![1, 2]),
                        ConditionNode::rule("data.status", Operator::StartsWith, Scalar::from("draft")),
                    ],
                ),
            ],
        );
        let canonical = pipeline.run(tree).tree;

        for text in [to_text(&canonical).unwrap(), to_pretty_text(&canonical).unwrap()] {
            let reparsed = parse_text(&text, &pipeline).unwrap();
            assert_eq!(reparsed.tree, canonical);
        }
    }

    #[test]
    fn test_rejects_garbage() {
        let pipeline = ConditionPipeline::default();
        assert!(matches!(
            parse_text("{not json", &pipeline),
            Err(ConditionError::Unparseable(_))
        ));
        assert!(matches!(
            parse_text("[1, 2]", &pipeline),
            Err(ConditionError::Unparseable(_))
        ));
    }

    #[test]
    fn test_pasted_legacy_text_is_expanded_and_pruned() {
        let pipeline = ConditionPipeline::default();
        let text = r#"{"operator":"and","rules":[
            {"field":"user.access_restriction","operator":"and","rules":[
                {"field":"user.department_id","operator":"eq","value":"3"},
                {"field":"user.role_id","operator":"in","value":[]}
            ]}
        ]}"#;
        let outcome = parse_text(text, &pipeline).unwrap();
        assert_eq!(
            outcome.tree,
            ConditionNode::group(
                LogicalOperator::And,
                vec![ConditionNode::rule("user.department_id", Operator::Eq, Scalar::from(3))]
            )
        );
    }
}
