//! Module dedicated to the mail session seam.
//!
//! The synchronization engine consumes remote state through the
//! [`MailSession`] trait, which exposes the handful of protocol
//! operations the cycle needs. The production implementation lives in
//! [`crate::imap`]; tests drive the engine with scripted mocks.

use crate::{
    flag::{Flag, Flags},
    sync::plan::UidInterval,
    Result,
};

/// The session capabilities, detected once at session open.
///
/// The capability flag is threaded explicitly through every call that
/// depends on it, rather than toggling behavior globally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// Whether the server supports the vendor label extension
    /// (`X-GM-EXT-1`), which attaches arbitrary labels to messages.
    pub label_ext: bool,
}

/// The status of a selected mailbox.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MailboxStatus {
    /// The validity token reported by the server for this mailbox.
    pub uid_validity: u32,
}

/// A remote message, as fetched for one synchronization cycle.
///
/// Content is only present for messages fetched from the "new" range;
/// the "old" range is metadata-only.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteMessage {
    /// The sequence id of the message within the current validity
    /// epoch.
    pub uid: u32,

    /// The message flags.
    pub flags: Flags,

    /// The message labels. Always empty when the session lacks the
    /// label extension.
    pub labels: Vec<String>,

    /// The raw message content.
    pub raw: Option<Vec<u8>>,
}

impl RemoteMessage {
    /// Returns `true` if the seen flag is set.
    pub fn seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }

    /// Returns `true` if the given label is attached to the message.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// The direction of a store mutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreAction {
    /// Add the given values to the attribute.
    Add,

    /// Remove the given values from the attribute.
    Remove,
}

impl StoreAction {
    /// The sign prefixing the attribute in the wire command.
    pub fn sign(&self) -> char {
        match self {
            Self::Add => '+',
            Self::Remove => '-',
        }
    }
}

/// The abstract protocol operations consumed by the synchronization
/// engine.
///
/// One implementor handles exactly one authenticated session against
/// one account. Mailboxes are processed strictly sequentially within
/// a session: the underlying protocol is not safely multiplexed.
pub trait MailSession {
    /// Returns the capabilities detected at session open.
    fn capabilities(&self) -> Capabilities;

    /// Lists all mailbox names known to the server. Used once per
    /// session to seed the label reverse map.
    fn list_mailbox_names(&mut self) -> Result<Vec<String>>;

    /// Selects the given mailbox read-only and returns its status.
    fn examine(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    /// Selects the given mailbox writable and returns its status.
    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    /// Searches sequence ids within the given interval. The result is
    /// sorted ascending.
    fn uid_search(&mut self, interval: &UidInterval) -> Result<Vec<u32>>;

    /// Fetches flags (and labels, when `with_labels`) for the given
    /// ids.
    fn uid_fetch_meta(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>>;

    /// Fetches flags, labels and full content for the given ids.
    fn uid_fetch_full(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>>;

    /// Adds or removes flags on the given message.
    fn uid_store_flags(&mut self, uid: u32, action: StoreAction, flags: &Flags) -> Result<()>;

    /// Adds or removes labels on the given message. Only meaningful
    /// when the session has the label extension.
    fn uid_store_labels(&mut self, uid: u32, action: StoreAction, labels: &[String]) -> Result<()>;

    /// Closes the session. Implementations are expected to also
    /// release the connection on drop, so that the session ends on
    /// every exit path.
    fn logout(&mut self) -> Result<()>;
}
