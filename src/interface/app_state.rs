use crate::application::command_bus::CommandBus;
use crate::application::query_bus::QueryBus;
use crate::application::services::TemplateConditionGenerator;
use crate::infrastructure::SessionRepository;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionRepository + Send + Sync>,
    pub generator: Arc<TemplateConditionGenerator>,
    pub command_bus: Arc<CommandBus>,
    pub query_bus: Arc<QueryBus>,
}
