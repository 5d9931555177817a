//! Module dedicated to the synchronization report.
//!
//! Per-message failures never abort a cycle; they are captured here
//! as explicit outcomes and surfaced to the caller instead of being
//! silently swallowed.

use std::fmt;

use crate::{conversation::ConversationRef, mailbox::Cursor, store::MessageKey};

/// The report of one account synchronization cycle.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// One entry per mailbox the cycle looked at, in processing
    /// order.
    pub mailboxes: Vec<MailboxSyncReport>,

    /// Whether the cycle was interrupted by the abort flag before
    /// completing every mailbox.
    pub aborted: bool,
}

impl SyncReport {
    /// Total number of messages ingested across all mailboxes.
    pub fn ingested_count(&self) -> usize {
        self.mailboxes
            .iter()
            .flat_map(|m| &m.messages)
            .filter(|(_, outcome)| matches!(outcome, MessageSyncOutcome::Ingested(_)))
            .count()
    }

    /// Total number of messages skipped across all mailboxes.
    pub fn skipped_count(&self) -> usize {
        self.mailboxes
            .iter()
            .flat_map(|m| &m.messages)
            .filter(|(_, outcome)| outcome.is_skip())
            .count()
    }
}

/// The report of one processed mailbox.
#[derive(Debug, Default)]
pub struct MailboxSyncReport {
    /// The mailbox name.
    pub mailbox: String,

    /// Whether the cursor was invalidated by a validity token change
    /// at the beginning of the pass.
    pub invalidated: bool,

    /// The cursor persisted at the end of the pass, absent when the
    /// mailbox failed before reaching that point.
    pub cursor: Option<Cursor>,

    /// Per-message outcomes of the downlink passes, in processing
    /// order.
    pub messages: Vec<(u32, MessageSyncOutcome)>,

    /// Per-record outcomes of the uplink pass.
    pub pushed: Vec<(MessageKey, PushOutcome)>,

    /// The error that interrupted the mailbox pass, if any. Errors
    /// recorded here did not abort sibling mailboxes.
    pub error: Option<crate::Error>,
}

impl MailboxSyncReport {
    pub fn new(mailbox: impl ToString) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            ..Default::default()
        }
    }
}

/// The outcome of one message during a downlink pass.
#[derive(Debug)]
pub enum MessageSyncOutcome {
    /// The message was ingested into a new conversation and its
    /// record created.
    Ingested(ConversationRef),

    /// The message matched an existing record and its conversation
    /// state was refreshed.
    Reconciled(ConversationRef),

    /// The message was fetched but no record matches its correlation
    /// key: it was never ingested. A benign gap, not an error.
    SkippedMissingRecord,

    /// The record is marked dirty: local state is pending upload and
    /// wins over remote state for this cycle.
    SkippedDirty,

    /// The ingestion pipeline rejected the message. No record was
    /// created; the watermark still advances past it.
    SkippedIngestion(String),

    /// The message came back from the fetch without usable content.
    SkippedMissingContent,
}

impl MessageSyncOutcome {
    pub fn is_skip(&self) -> bool {
        !matches!(self, Self::Ingested(_) | Self::Reconciled(_))
    }
}

impl fmt::Display for MessageSyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingested(conversation) => write!(f, "ingested into {conversation}"),
            Self::Reconciled(conversation) => write!(f, "reconciled with {conversation}"),
            Self::SkippedMissingRecord => write!(f, "skipped: never ingested"),
            Self::SkippedDirty => write!(f, "skipped: local changes pending"),
            Self::SkippedIngestion(reason) => write!(f, "skipped by ingestion: {reason}"),
            Self::SkippedMissingContent => write!(f, "skipped: no content"),
        }
    }
}

/// The outcome of one dirty record during the uplink pass.
#[derive(Debug)]
pub enum PushOutcome {
    /// Remote state now matches local state; the dirty mark was
    /// cleared.
    Pushed,

    /// The message is gone from the mailbox; retried next cycle.
    SkippedVanished,

    /// A mutation failed; the dirty mark was kept so the record is
    /// retried next cycle.
    Failed(String),
}

impl fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pushed => write!(f, "pushed"),
            Self::SkippedVanished => write!(f, "skipped: message vanished"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
