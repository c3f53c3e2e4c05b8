//! Conversation resources managed by the session registry
//!
//! A conversation is a long-lived, stateful, expensive-to-create object. The registry
//! never looks inside one: it only creates it through a [`ConversationFactory`], runs
//! turns with [`Conversation::send_and_run`] and releases it with [`Conversation::close`].
//! Persisting conversation state is the conversation's own job.
//!
//! # Example
//!
//! ```rust,no_run
//! use dash_sessions::conversation::{ConversationFactory, LocalConversationFactory};
//! use std::path::Path;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let factory = LocalConversationFactory::new(false);
//!     let conversation = factory.create(None, Path::new("/tmp/sessions")).await?;
//!     let reply = conversation.send_and_run("How many races in 2019?").await?;
//!     println!("{}: {}", conversation.id(), reply);
//!     conversation.close().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

pub mod local;
pub mod persistence;
pub mod types;

pub use local::{AckResponder, LocalConversation, LocalConversationFactory, Responder};
pub use persistence::TranscriptStore;
pub use types::{Message, Transcript};

/// A stateful conversation with an agent.
///
/// Implementations must tolerate `close` being called while a `send_and_run` is still
/// running: shutdown closes every conversation regardless of in-flight work, and the
/// interrupted turn is then expected to fail.
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Stable identifier, fixed at creation
    fn id(&self) -> &str;

    /// Sends a user message and runs the agent until it produces a reply
    async fn send_and_run(&self, message: &str) -> anyhow::Result<String>;

    /// Releases the conversation and flushes any persisted state
    async fn close(&self) -> anyhow::Result<()>;
}

/// Creates conversations, optionally resuming a previous one by id.
#[async_trait]
pub trait ConversationFactory: Send + Sync {
    async fn create(
        &self,
        resume_id: Option<Uuid>,
        storage_dir: &Path,
    ) -> anyhow::Result<Box<dyn Conversation>>;
}
