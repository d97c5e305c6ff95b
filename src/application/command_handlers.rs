use super::command_bus::CommandHandler;
use super::commands::{
    AddConditionNodeCommand, DeleteConditionNodeCommand, DiscardSessionCommand,
    GenerationReport, GenerationStatus, MoveConditionNodeCommand, NewConditionNode, NodeAdded,
    PasteConditionTextCommand, ReplaceConditionCommand, SavePolicyCommand,
    SelectTemplatesCommand, SetGroupOperatorCommand, StartAuthoringSessionCommand,
    UpdateRuleCommand, UpdateTemplateParameterCommand,
};
use super::events::EventFactory;
use super::normalizer::normalize_value;
use super::services::{ConditionError, TemplateConditionGenerator};
use super::session::{AuthoringSession, GenerationOutcome, GenerationPlan, SessionSnapshot};
use super::validators::{CommandValidator, ConditionValidator, SavePolicyCommandValidator};
use crate::domain::policy::{PolicyPayload, PolicyRecord};
use crate::infrastructure::{PolicyRepository, SessionRepository, SharedSession, TemplateCatalog};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

async fn load_session(
    sessions: &Arc<dyn SessionRepository + Send + Sync>,
    session_id: &str,
) -> Result<SharedSession, ConditionError> {
    sessions
        .get(session_id)
        .await?
        .ok_or_else(|| ConditionError::SessionNotFound(session_id.to_string()))
}

/// Runs one edit against a session under its lock and returns the new snapshot.
async fn edit_session<T: Send>(
    sessions: &Arc<dyn SessionRepository + Send + Sync>,
    generator: &TemplateConditionGenerator,
    session_id: &str,
    edit: impl FnOnce(&mut AuthoringSession) -> Result<T, ConditionError> + Send,
) -> Result<(T, SessionSnapshot), ConditionError> {
    let session = load_session(sessions, session_id).await?;
    let mut session = session.lock().await;
    let value = edit(&mut *session)?;
    Ok((value, session.snapshot(generator)))
}

/// Applies a template edit, then regenerates the condition if the parameters allow it.
/// The session lock is released while the combination request is in flight, so a
/// later edit can supersede it.
async fn edit_and_regenerate(
    sessions: &Arc<dyn SessionRepository + Send + Sync>,
    generator: &TemplateConditionGenerator,
    session_id: &str,
    edit: impl FnOnce(&mut AuthoringSession) -> Result<(), ConditionError> + Send,
) -> Result<GenerationReport, ConditionError> {
    let shared = load_session(sessions, session_id).await?;

    let plan = {
        let mut session = shared.lock().await;
        edit(&mut *session)?;
        session.begin_generation(generator)?
    };

    let (status, message) = match plan {
        GenerationPlan::Idle => (GenerationStatus::Idle, None),
        GenerationPlan::Skipped(assessments) => {
            info!(
                incomplete_templates = assessments.len(),
                "Template generation skipped: parameters incomplete"
            );
            (GenerationStatus::Skipped, None)
        }
        GenerationPlan::Ready(ticket) => {
            let result = generator.generate(&ticket.request).await;
            let rule_count = result
                .as_ref()
                .map(|o| o.tree.complete_rule_count())
                .unwrap_or(0);

            let mut session = shared.lock().await;
            match session.complete_generation(ticket.sequence, result) {
                GenerationOutcome::Applied => {
                    let event = EventFactory::condition_generated(
                        session.id.clone(),
                        ticket.sequence,
                        ticket.request.template_ids.clone(),
                        rule_count,
                    );
                    tracing::info!(event_id = %event.event_id, sequence = ticket.sequence, "Condition generated event published");
                    (GenerationStatus::Applied, None)
                }
                GenerationOutcome::Stale => {
                    let event = EventFactory::generation_discarded(
                        session.id.clone(),
                        ticket.sequence,
                        session.generation_sequence(),
                    );
                    warn!(
                        event_id = %event.event_id,
                        sequence = ticket.sequence,
                        current = session.generation_sequence(),
                        "Stale template generation discarded"
                    );
                    (GenerationStatus::Discarded, None)
                }
                GenerationOutcome::Failed(message) => {
                    warn!(error = %message, "Template generation failed; previous condition kept");
                    (GenerationStatus::Failed, Some(message))
                }
            }
        }
    };

    let session = shared.lock().await;
    Ok(GenerationReport {
        status,
        message,
        session: session.snapshot(generator),
    })
}

// ============================================================================
// COMMAND HANDLERS
// ============================================================================

/// Start authoring session command handler
pub struct StartAuthoringSessionCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    template_catalog: Arc<dyn TemplateCatalog + Send + Sync>,
    policy_repo: Arc<dyn PolicyRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl StartAuthoringSessionCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        template_catalog: Arc<dyn TemplateCatalog + Send + Sync>,
        policy_repo: Arc<dyn PolicyRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self {
            sessions,
            template_catalog,
            policy_repo,
            generator,
        }
    }
}

#[async_trait]
impl CommandHandler<StartAuthoringSessionCommand> for StartAuthoringSessionCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "start_authoring_session_command_handler", skip(self, command))]
    async fn handle(&self, command: StartAuthoringSessionCommand) -> Result<Self::Result, Self::Error> {
        let templates = self
            .template_catalog
            .list_templates(command.action_code.as_deref())
            .await?;
        let mut session = AuthoringSession::new(command.action_code.clone(), templates);

        if let Some(policy_id) = &command.policy_id {
            let record = self
                .policy_repo
                .get_policy(policy_id)
                .await?
                .ok_or_else(|| ConditionError::PolicyNotFound(policy_id.clone()))?;
            session = session.editing(&record, self.generator.pipeline());
        }

        let snapshot = session.snapshot(&self.generator);
        self.sessions.insert(session).await?;

        let event = EventFactory::session_started(
            snapshot.id.clone(),
            command.action_code,
            command.policy_id,
        );
        tracing::info!(event_id = %event.event_id, session_id = %snapshot.id, "Authoring session started event published");

        Ok(snapshot)
    }
}

/// Add condition node command handler
pub struct AddConditionNodeCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl AddConditionNodeCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<AddConditionNodeCommand> for AddConditionNodeCommandHandler {
    type Result = NodeAdded;
    type Error = ConditionError;

    #[instrument(name = "add_condition_node_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: AddConditionNodeCommand) -> Result<Self::Result, Self::Error> {
        let pipeline = self.generator.pipeline();
        let (path, session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            let path = match command.node {
                NewConditionNode::Rule(rule) => s.add_rule(&command.parent_path, rule, pipeline)?,
                NewConditionNode::Group(operator) => s.add_group(&command.parent_path, operator)?,
            };
            Ok(path)
        })
        .await?;
        Ok(NodeAdded { path, session })
    }
}

/// Update rule command handler
pub struct UpdateRuleCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl UpdateRuleCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<UpdateRuleCommand> for UpdateRuleCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "update_rule_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: UpdateRuleCommand) -> Result<Self::Result, Self::Error> {
        let pipeline = self.generator.pipeline();
        let ((), session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.update_rule(&command.path, command.update, pipeline)?)
        })
        .await?;
        Ok(session)
    }
}

/// Set group operator command handler
pub struct SetGroupOperatorCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl SetGroupOperatorCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<SetGroupOperatorCommand> for SetGroupOperatorCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "set_group_operator_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: SetGroupOperatorCommand) -> Result<Self::Result, Self::Error> {
        let ((), session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.set_group_operator(&command.path, command.operator)?)
        })
        .await?;
        Ok(session)
    }
}

/// Delete condition node command handler
pub struct DeleteConditionNodeCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl DeleteConditionNodeCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<DeleteConditionNodeCommand> for DeleteConditionNodeCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "delete_condition_node_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: DeleteConditionNodeCommand) -> Result<Self::Result, Self::Error> {
        let (_, session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.delete_node(&command.path)?)
        })
        .await?;
        Ok(session)
    }
}

/// Move condition node command handler
pub struct MoveConditionNodeCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl MoveConditionNodeCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<MoveConditionNodeCommand> for MoveConditionNodeCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "move_condition_node_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: MoveConditionNodeCommand) -> Result<Self::Result, Self::Error> {
        let ((), session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.move_node(&command.parent_path, command.from, command.to)?)
        })
        .await?;
        Ok(session)
    }
}

/// Paste condition text command handler
pub struct PasteConditionTextCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl PasteConditionTextCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<PasteConditionTextCommand> for PasteConditionTextCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "paste_condition_text_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: PasteConditionTextCommand) -> Result<Self::Result, Self::Error> {
        let pipeline = self.generator.pipeline();
        let ((), session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            s.paste_text(&command.text, pipeline)
        })
        .await
        .inspect_err(|e| warn!(error = %e, "Pasted condition rejected"))?;
        Ok(session)
    }
}

/// Replace condition command handler
pub struct ReplaceConditionCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl ReplaceConditionCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<ReplaceConditionCommand> for ReplaceConditionCommandHandler {
    type Result = SessionSnapshot;
    type Error = ConditionError;

    #[instrument(name = "replace_condition_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: ReplaceConditionCommand) -> Result<Self::Result, Self::Error> {
        let pipeline = self.generator.pipeline();
        let node = normalize_value(&command.condition);
        let ((), session) = edit_session(&self.sessions, &self.generator, &command.session_id, |s| {
            s.replace_condition(node, pipeline);
            Ok(())
        })
        .await?;
        Ok(session)
    }
}

/// Select templates command handler
pub struct SelectTemplatesCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl SelectTemplatesCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<SelectTemplatesCommand> for SelectTemplatesCommandHandler {
    type Result = GenerationReport;
    type Error = ConditionError;

    #[instrument(name = "select_templates_command_handler", skip(self, command), fields(session_id = %command.session_id, templates = ?command.template_ids))]
    async fn handle(&self, command: SelectTemplatesCommand) -> Result<Self::Result, Self::Error> {
        edit_and_regenerate(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.select_templates(command.template_ids)?)
        })
        .await
    }
}

/// Update template parameter command handler
pub struct UpdateTemplateParameterCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
}

impl UpdateTemplateParameterCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self { sessions, generator }
    }
}

#[async_trait]
impl CommandHandler<UpdateTemplateParameterCommand> for UpdateTemplateParameterCommandHandler {
    type Result = GenerationReport;
    type Error = ConditionError;

    #[instrument(
        name = "update_template_parameter_command_handler",
        skip(self, command),
        fields(session_id = %command.session_id, template_id = command.template_id, key = %command.key)
    )]
    async fn handle(&self, command: UpdateTemplateParameterCommand) -> Result<Self::Result, Self::Error> {
        edit_and_regenerate(&self.sessions, &self.generator, &command.session_id, |s| {
            Ok(s.set_parameter(command.template_id, command.key, command.value)?)
        })
        .await
    }
}

/// Save policy command handler
pub struct SavePolicyCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
    policy_repo: Arc<dyn PolicyRepository + Send + Sync>,
    generator: Arc<TemplateConditionGenerator>,
    validator: SavePolicyCommandValidator,
}

impl SavePolicyCommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionRepository + Send + Sync>,
        policy_repo: Arc<dyn PolicyRepository + Send + Sync>,
        generator: Arc<TemplateConditionGenerator>,
    ) -> Self {
        Self {
            sessions,
            policy_repo,
            generator,
            validator: SavePolicyCommandValidator,
        }
    }
}

#[async_trait]
impl CommandHandler<SavePolicyCommand> for SavePolicyCommandHandler {
    type Result = PolicyRecord;
    type Error = ConditionError;

    #[instrument(name = "save_policy_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: SavePolicyCommand) -> Result<Self::Result, Self::Error> {
        self.validator.validate(&command).await?;

        let shared = load_session(&self.sessions, &command.session_id).await?;
        let mut session = shared.lock().await;

        let outcome = session.prepared_condition(self.generator.pipeline());
        ConditionValidator::validate_for_submission(&outcome)?;

        let payload = PolicyPayload {
            name: command.name.trim().to_string(),
            description: command.description,
            action_code: session.action_code.clone(),
            effect: command.effect,
            priority: command.priority,
            template_ids: session.selected_templates.clone(),
            conditions: outcome.tree,
        };

        let created = session.policy_id.is_none();
        let record = match &session.policy_id {
            Some(policy_id) => self.policy_repo.update_policy(policy_id, &payload).await?,
            None => self.policy_repo.create_policy(&payload).await?,
        };
        session.policy_id = Some(record.id.clone());

        let event = EventFactory::policy_saved(
            record.id.clone(),
            session.id.clone(),
            record.name.clone(),
            created,
        );
        tracing::info!(event_id = %event.event_id, policy_id = %record.id, created, "Policy saved event published");

        Ok(record)
    }
}

/// Discard session command handler
pub struct DiscardSessionCommandHandler {
    sessions: Arc<dyn SessionRepository + Send + Sync>,
}

impl DiscardSessionCommandHandler {
    pub fn new(sessions: Arc<dyn SessionRepository + Send + Sync>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl CommandHandler<DiscardSessionCommand> for DiscardSessionCommandHandler {
    type Result = ();
    type Error = ConditionError;

    #[instrument(name = "discard_session_command_handler", skip(self, command), fields(session_id = %command.session_id))]
    async fn handle(&self, command: DiscardSessionCommand) -> Result<Self::Result, Self::Error> {
        if !self.sessions.remove(&command.session_id).await? {
            return Err(ConditionError::SessionNotFound(command.session_id));
        }
        let event = EventFactory::session_discarded(command.session_id);
        tracing::info!(event_id = %event.event_id, "Authoring session discarded event published");
        Ok(())
    }
}
