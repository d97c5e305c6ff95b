use crate::domain::template::TemplateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base trait for all domain events
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> &str;
    fn aggregate_id(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn event_type(&self) -> &str;
}

/// Authoring session events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedEvent {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub action_code: Option<String>,
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDiscardedEvent {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Template generation events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGeneratedEvent {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub sequence: u64,
    pub template_ids: Vec<TemplateId>,
    pub rule_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDiscardedEvent {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub sequence: u64,
    pub current_sequence: u64,
}

/// Policy events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySavedEvent {
    pub event_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub session_id: String,
    pub policy_name: String,
    pub created: bool,
}

/// Event factory functions
pub struct EventFactory;

impl EventFactory {
    pub fn session_started(
        session_id: String,
        action_code: Option<String>,
        policy_id: Option<String>,
    ) -> SessionStartedEvent {
        SessionStartedEvent {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: session_id,
            occurred_at: Utc::now(),
            action_code,
            policy_id,
        }
    }

    pub fn session_discarded(session_id: String) -> SessionDiscardedEvent {
        SessionDiscardedEvent {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: session_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn condition_generated(
        session_id: String,
        sequence: u64,
        template_ids: Vec<TemplateId>,
        rule_count: usize,
    ) -> ConditionGeneratedEvent {
        ConditionGeneratedEvent {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: session_id,
            occurred_at: Utc::now(),
            sequence,
            template_ids,
            rule_count,
        }
    }

    pub fn generation_discarded(
        session_id: String,
        sequence: u64,
        current_sequence: u64,
    ) -> GenerationDiscardedEvent {
        GenerationDiscardedEvent {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: session_id,
            occurred_at: Utc::now(),
            sequence,
            current_sequence,
        }
    }

    pub fn policy_saved(
        policy_id: String,
        session_id: String,
        policy_name: String,
        created: bool,
    ) -> PolicySavedEvent {
        PolicySavedEvent {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: policy_id,
            occurred_at: Utc::now(),
            session_id,
            policy_name,
            created,
        }
    }
}

impl DomainEvent for SessionStartedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "SessionStarted"
    }
}

impl DomainEvent for SessionDiscardedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "SessionDiscarded"
    }
}

impl DomainEvent for ConditionGeneratedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "ConditionGenerated"
    }
}

impl DomainEvent for GenerationDiscardedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "GenerationDiscarded"
    }
}

impl DomainEvent for PolicySavedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "PolicySaved"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_started_event() {
        let event = EventFactory::session_started(
            "session-1".to_string(),
            Some("expense.approve".to_string()),
            None,
        );

        assert_eq!(event.event_type(), "SessionStarted");
        assert_eq!(event.aggregate_id(), "session-1");
        assert_eq!(event.action_code.as_deref(), Some("expense.approve"));
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn test_generation_discarded_event() {
        let event = EventFactory::generation_discarded("session-1".to_string(), 3, 5);

        assert_eq!(event.event_type(), "GenerationDiscarded");
        assert_eq!(event.sequence, 3);
        assert_eq!(event.current_sequence, 5);
    }
}
