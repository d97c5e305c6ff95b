use crate::domain::condition::ConditionNode;
use serde::{Deserialize, Serialize};

/// Query to get the current state of an authoring session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSessionQuery {
    pub session_id: String,
}

/// Query to render the condition a session would submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConditionQuery {
    pub session_id: String,
    pub pretty: bool,
}

/// Query to list templates available for an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTemplatesQuery {
    pub action_code: Option<String>,
}

/// Query to list the attribute vocabulary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAttributesQuery;

/// Query to load selectable values for several attributes at once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAttributeOptionsQuery {
    pub attribute_keys: Vec<String>,
}

/// Query to run a loosely shaped condition through the full pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConditionQuery {
    pub condition: serde_json::Value,
}

/// Rendered condition text
#[derive(Debug, Clone, Serialize)]
pub struct ConditionPreview {
    pub text: String,
    pub has_valid_rule: bool,
    pub rule_count: usize,
}

/// Pipeline output for ad-hoc conditions
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedCondition {
    pub condition: ConditionNode,
    pub has_valid_rule: bool,
}

/// Query factory functions
pub struct QueryFactory;

impl QueryFactory {
    pub fn get_session(session_id: String) -> GetSessionQuery {
        GetSessionQuery { session_id }
    }

    pub fn preview_condition(session_id: String, pretty: bool) -> PreviewConditionQuery {
        PreviewConditionQuery { session_id, pretty }
    }

    pub fn list_templates(action_code: Option<String>) -> ListTemplatesQuery {
        ListTemplatesQuery { action_code }
    }

    pub fn list_attributes() -> ListAttributesQuery {
        ListAttributesQuery
    }

    /// Accepts a comma separated key list; blanks and duplicates are dropped.
    pub fn list_attribute_options(keys: &str) -> ListAttributeOptionsQuery {
        let mut attribute_keys: Vec<String> = vec![];
        for key in keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            if !attribute_keys.iter().any(|k| k == key) {
                attribute_keys.push(key.to_string());
            }
        }
        ListAttributeOptionsQuery { attribute_keys }
    }

    pub fn normalize_condition(condition: serde_json::Value) -> NormalizeConditionQuery {
        NormalizeConditionQuery { condition }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_attribute_options_query_creation() {
        let query = QueryFactory::list_attribute_options("user.department_id, ,user.role_id,user.department_id");
        assert_eq!(
            query.attribute_keys,
            vec!["user.department_id".to_string(), "user.role_id".to_string()]
        );
    }

    #[test]
    fn test_preview_query_creation() {
        let query = QueryFactory::preview_condition("session-1".to_string(), true);
        assert_eq!(query.session_id, "session-1");
        assert!(query.pretty);
    }
}
