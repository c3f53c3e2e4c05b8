//! Transport-agnostic service surface used by the CLI and the gateway

use crate::config::Config;
use crate::conversation::ConversationFactory;
use crate::session::registry::parse_session_id;
use crate::session::{Dispatcher, Reply, SessionRegistry};
use crate::utils::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub exists: bool,
}

pub struct ChatService {
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn from_config(config: &Config, factory: Arc<dyn ConversationFactory>) -> Self {
        let registry = Arc::new(SessionRegistry::from_config(config, factory));
        Self::new(Dispatcher::new(
            registry,
            config.request_timeout(),
            config.max_concurrent_requests,
        ))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.dispatcher.registry()
    }

    pub async fn create_session(&self) -> Result<SessionInfo> {
        self.open_session(None).await
    }

    /// Creates a session, or resumes `id` from storage when it is not loaded.
    pub async fn open_session(&self, id: Option<&str>) -> Result<SessionInfo> {
        self.dispatcher.ensure_accepting()?;
        let (_, id) = self.registry().get_or_create(id).await?;
        Ok(SessionInfo { id })
    }

    pub async fn session_status(&self, id: &str) -> Result<SessionStatus> {
        parse_session_id(id)?;
        let exists = self.registry().lookup(id).await.is_some();
        Ok(SessionStatus { exists })
    }

    pub async fn chat(&self, id: Option<&str>, message: &str) -> Result<Reply> {
        self.dispatcher.dispatch(id, message).await
    }

    /// Drains the service. Safe to call more than once.
    pub async fn shutdown(&self) {
        let closed = self.dispatcher.shutdown().await;
        info!(closed_sessions = closed, "Chat service shut down");
    }
}
