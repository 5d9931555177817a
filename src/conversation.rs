//! Module dedicated to conversation collaborators.
//!
//! Conversations, their tags and their archive state are owned by the
//! external discussion system. The engine only reaches them through
//! the interfaces defined here. Every mutating call takes the acting
//! identity as an explicit parameter: there is no process-wide actor.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::MessageKey;

/// Errors returned by the external ingestion pipeline.
///
/// Whatever the cause, the engine reacts the same way: the message is
/// skipped, no record is created, and the batch continues.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("message was already ingested")]
    Duplicate,
    #[error("cannot parse message content")]
    Malformed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("message was rejected: {0}")]
    Rejected(String),
}

/// Reference to a conversation of the discussion system.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversationRef(pub String);

impl ConversationRef {
    pub fn new(id: impl ToString) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity acting on the discussion system when the engine
/// mutates tags or archive state.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct ActorRef(pub String);

impl ActorRef {
    pub fn new(id: impl ToString) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The external ingestion pipeline turning raw message content into a
/// conversation.
///
/// Ingestion must be idempotent over the correlation key: the cycle
/// guarantees at-least-once delivery, not exactly-once.
#[async_trait]
pub trait IngestionPipeline: Send + Sync {
    /// Processes raw message content destined to the given account.
    async fn process(
        &self,
        raw: &[u8],
        account_id: &str,
        key: MessageKey,
    ) -> Result<ConversationRef, IngestionError>;
}

/// The tag interface of the discussion system.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Returns the current tag set of a conversation.
    async fn tags(&self, conversation: &ConversationRef) -> crate::Result<BTreeSet<String>>;

    /// Replaces the whole tag set of a conversation.
    async fn apply_tags(
        &self,
        actor: &ActorRef,
        conversation: &ConversationRef,
        tags: BTreeSet<String>,
    ) -> crate::Result<()>;
}

/// The archive interface of the discussion system.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Returns whether the conversation is archived for the account.
    async fn is_archived(
        &self,
        account_id: &str,
        conversation: &ConversationRef,
    ) -> crate::Result<bool>;

    /// Moves the conversation in or out of the account's archive.
    async fn set_archived(
        &self,
        actor: &ActorRef,
        account_id: &str,
        conversation: &ConversationRef,
        archived: bool,
    ) -> crate::Result<()>;
}
