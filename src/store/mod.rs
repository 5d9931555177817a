//! Module dedicated to the persisted synchronization state.
//!
//! Two kinds of state survive across cycles: the per-mailbox cursor
//! and the message correlation records. Both are reached through
//! traits so the host application can back them with its own schema;
//! in-memory implementations suitable for tests and embedding live in
//! [`memory`].

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    conversation::ConversationRef,
    mailbox::{Cursor, Mailbox},
};

/// Alias for the error type stores wrap.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors related to the persisted synchronization state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot list mailboxes of account {1}")]
    ListMailboxesError(#[source] BoxError, String),
    #[error("cannot persist cursor of mailbox {1}")]
    PersistCursorError(#[source] BoxError, String),
    #[error("cannot access message records")]
    RecordAccessError(#[source] BoxError),
}

/// The correlation key of a message: its sequence id qualified by the
/// validity epoch it was assigned in.
///
/// The key identifies at most one [`MessageRecord`] and is the unit
/// of ingestion deduplication.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageKey {
    /// The validity token of the epoch.
    pub uid_validity: u32,

    /// The sequence id within the epoch.
    pub uid: u32,
}

impl MessageKey {
    pub fn new(uid_validity: u32, uid: u32) -> Self {
        Self { uid_validity, uid }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid_validity, self.uid)
    }
}

/// The persisted correlation between a remote message and the
/// conversation it was ingested into.
///
/// Records are created exactly once at ingestion time and never
/// deleted by this library. After a mailbox invalidation they become
/// unreachable by the old validity token but are retained.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageRecord {
    /// The correlation key.
    pub key: MessageKey,

    /// The conversation the message was ingested into.
    pub conversation: ConversationRef,

    /// Whether local state changed since the last push to the server.
    /// Set by the host application, cleared by the engine once the
    /// remote mutations succeeded.
    pub dirty: bool,
}

impl MessageRecord {
    pub fn new(key: MessageKey, conversation: ConversationRef) -> Self {
        Self {
            key,
            conversation,
            dirty: false,
        }
    }
}

/// The persisted mailbox state of an account.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Lists the mailboxes of the given account, including disabled
    /// ones.
    async fn list_mailboxes(&self, account_id: &str) -> Result<Vec<Mailbox>, Error>;

    /// Durably persists the cursor of the given mailbox.
    ///
    /// Called exactly once per processed mailbox, after all its
    /// reconciliation completed. A failure here is fatal for the rest
    /// of the account cycle: losing watermark state silently is worse
    /// than stopping.
    async fn persist_cursor(
        &self,
        account_id: &str,
        mailbox: &str,
        cursor: Cursor,
    ) -> Result<(), Error>;
}

/// The persisted message correlation records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up the record for the given correlation key.
    async fn find(&self, key: MessageKey) -> Result<Option<MessageRecord>, Error>;

    /// Inserts a freshly ingested record. Inserting an already known
    /// key leaves the existing record untouched, which keeps replayed
    /// cycles idempotent.
    async fn insert(&self, record: MessageRecord) -> Result<(), Error>;

    /// Lists the records of the given validity epoch that are marked
    /// dirty.
    async fn list_dirty(&self, uid_validity: u32) -> Result<Vec<MessageRecord>, Error>;

    /// Clears the dirty mark of the given record.
    async fn clear_dirty(&self, key: MessageKey) -> Result<(), Error>;
}
