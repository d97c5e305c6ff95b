use super::condition::ConditionNode;
use super::template::TemplateId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    #[default]
    Allow,
    Deny,
}

impl std::str::FromStr for PolicyEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(PolicyEffect::Allow),
            "deny" => Ok(PolicyEffect::Deny),
            other => Err(format!("unknown effect: {other}")),
        }
    }
}

/// Create/update body for the policy persistence API.
/// `conditions` is always a pruned, expanded, normalized root group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PolicyPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_code: Option<String>,
    pub effect: PolicyEffect,
    pub priority: i32, // 1-100, higher wins
    pub template_ids: Vec<TemplateId>,
    pub conditions: ConditionNode,
}

/// Policy as returned by the persistence API. Stored conditions may predate
/// the current tree shape, so they stay raw until normalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action_code: Option<String>,
    #[serde(default)]
    pub effect: PolicyEffect,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub template_ids: Vec<TemplateId>,
    #[serde(default)]
    pub conditions: serde_json::Value,
}
