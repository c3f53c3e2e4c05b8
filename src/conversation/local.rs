//! Built-in conversation backed by a JSON transcript on disk

use crate::conversation::persistence::TranscriptStore;
use crate::conversation::types::{Message, Transcript};
use crate::conversation::{Conversation, ConversationFactory};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Produces the agent's reply for one turn.
///
/// The agent stack (prompts, knowledge, SQL tools) plugs in here.
pub trait Responder: Send + Sync {
    fn respond(&self, transcript: &Transcript, message: &str) -> String;
}

/// Acknowledges each message with its turn number
pub struct AckResponder;

impl Responder for AckResponder {
    fn respond(&self, transcript: &Transcript, message: &str) -> String {
        format!("[turn {}] {}", transcript.user_turns(), message)
    }
}

pub struct LocalConversation {
    id: String,
    transcript: Mutex<Transcript>,
    store: Option<TranscriptStore>,
    responder: Arc<dyn Responder>,
    closed: AtomicBool,
}

impl LocalConversation {
    pub fn new(
        transcript: Transcript,
        store: Option<TranscriptStore>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            id: transcript.conversation_id.clone(),
            transcript: Mutex::new(transcript),
            store,
            responder,
            closed: AtomicBool::new(false),
        }
    }

    /// Copy of the current transcript
    pub async fn transcript(&self) -> Transcript {
        self.transcript.lock().await.clone()
    }
}

#[async_trait]
impl Conversation for LocalConversation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_and_run(&self, message: &str) -> Result<String> {
        if self.closed.load(Ordering::Acquire) {
            bail!("conversation {} is closed", self.id);
        }

        let mut transcript = self.transcript.lock().await;
        transcript.add_message(Message::user(message));
        let reply = self.responder.respond(&transcript, message);
        transcript.add_message(Message::assistant(reply.clone()));

        if let Some(store) = &self.store {
            store.save(&transcript).await?;
        }

        Ok(reply)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(store) = &self.store {
            let transcript = self.transcript.lock().await;
            store.save(&transcript).await?;
        }

        debug!(conversation_id = %self.id, "Conversation closed");
        Ok(())
    }
}

/// Creates [`LocalConversation`]s, resuming transcripts from the storage directory.
pub struct LocalConversationFactory {
    persist: bool,
    responder: Arc<dyn Responder>,
}

impl LocalConversationFactory {
    pub fn new(persist: bool) -> Self {
        Self {
            persist,
            responder: Arc::new(AckResponder),
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = responder;
        self
    }
}

#[async_trait]
impl ConversationFactory for LocalConversationFactory {
    async fn create(
        &self,
        resume_id: Option<Uuid>,
        storage_dir: &Path,
    ) -> Result<Box<dyn Conversation>> {
        let store = if self.persist {
            let store = TranscriptStore::new(storage_dir.to_path_buf());
            store.create_dir().await?;
            Some(store)
        } else {
            None
        };

        let id = resume_id.unwrap_or_else(Uuid::new_v4).to_string();

        let resumed = match (&store, resume_id) {
            (Some(store), Some(_)) => store.load(&id).await?,
            _ => None,
        };

        let transcript = match resumed {
            Some(transcript) => {
                info!(
                    conversation_id = %id,
                    messages = transcript.messages.len(),
                    "Resuming conversation"
                );
                transcript
            }
            None => {
                info!(conversation_id = %id, persist = self.persist, "Starting conversation");
                Transcript::new(id)
            }
        };

        Ok(Box::new(LocalConversation::new(
            transcript,
            store,
            Arc::clone(&self.responder),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_conversation_gets_uuid() {
        let temp_dir = TempDir::new().unwrap();
        let factory = LocalConversationFactory::new(false);

        let conversation = factory.create(None, temp_dir.path()).await.unwrap();
        assert!(Uuid::parse_str(conversation.id()).is_ok());
    }

    #[tokio::test]
    async fn test_ack_reply_counts_turns() {
        let temp_dir = TempDir::new().unwrap();
        let factory = LocalConversationFactory::new(false);
        let conversation = factory.create(None, temp_dir.path()).await.unwrap();

        assert_eq!(conversation.send_and_run("hi").await.unwrap(), "[turn 1] hi");
        assert_eq!(
            conversation.send_and_run("again").await.unwrap(),
            "[turn 2] again"
        );
    }

    #[tokio::test]
    async fn test_resume_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let factory = LocalConversationFactory::new(true);

        let id = {
            let conversation = factory.create(None, temp_dir.path()).await.unwrap();
            conversation.send_and_run("first").await.unwrap();
            conversation.close().await.unwrap();
            Uuid::parse_str(conversation.id()).unwrap()
        };

        let resumed = factory.create(Some(id), temp_dir.path()).await.unwrap();
        assert_eq!(resumed.id(), id.to_string());
        assert_eq!(
            resumed.send_and_run("second").await.unwrap(),
            "[turn 2] second"
        );
    }

    #[tokio::test]
    async fn test_no_persist_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = temp_dir.path().join("sessions");
        let factory = LocalConversationFactory::new(false);

        let conversation = factory.create(None, &storage).await.unwrap();
        conversation.send_and_run("hello").await.unwrap();
        conversation.close().await.unwrap();

        assert!(!storage.exists());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let temp_dir = TempDir::new().unwrap();
        let factory = LocalConversationFactory::new(false);
        let conversation = factory.create(None, temp_dir.path()).await.unwrap();

        conversation.close().await.unwrap();
        // Second close is a no-op
        conversation.close().await.unwrap();

        assert!(conversation.send_and_run("late").await.is_err());
    }

    #[tokio::test]
    async fn test_custom_responder() {
        struct Upper;
        impl Responder for Upper {
            fn respond(&self, _transcript: &Transcript, message: &str) -> String {
                message.to_uppercase()
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let factory = LocalConversationFactory::new(false).with_responder(Arc::new(Upper));
        let conversation = factory.create(None, temp_dir.path()).await.unwrap();

        assert_eq!(conversation.send_and_run("laps").await.unwrap(), "LAPS");
    }
}
