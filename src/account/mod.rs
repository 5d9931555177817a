//! Module dedicated to account configuration.
//!
//! An account represents one remote mail endpoint owned by a group of
//! the discussion system. The configuration is read-only to this
//! library: credentials and parameters are managed elsewhere.

use crate::imap::config::ImapConfig;

/// The account configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AccountConfig {
    /// The account identifier, as known by the conversation store.
    pub id: String,

    /// The account display name, used for logging and for the
    /// synchronization lock file.
    pub name: String,

    /// The IMAP endpoint configuration.
    pub imap: ImapConfig,

    /// The rule used to derive the archived state of a conversation
    /// from the remote flags and labels of its originating message.
    pub archive_rule: ArchiveRule,
}

impl AccountConfig {
    pub fn new(id: impl ToString, name: impl ToString, imap: ImapConfig) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            imap,
            archive_rule: ArchiveRule::default(),
        }
    }

    /// Archive rule setter following the builder pattern.
    pub fn with_archive_rule(mut self, rule: ArchiveRule) -> Self {
        self.archive_rule = rule;
        self
    }
}

/// The rule deriving the archived state of a conversation from remote
/// message state.
///
/// The two variants reflect the two behaviors observed for personal
/// and group mailboxes: a message may be considered archived as soon
/// as it leaves the inbox, or also while it remains unread.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum ArchiveRule {
    /// Archived when the inbox label is absent.
    OutsideInbox,

    /// Archived when the inbox label is absent or the seen flag is
    /// absent. This is the group mailbox variant.
    #[default]
    OutsideInboxOrUnseen,
}

impl ArchiveRule {
    /// Evaluates the rule against remote message state.
    pub fn archived(&self, in_inbox: bool, seen: bool) -> bool {
        match self {
            Self::OutsideInbox => !in_inbox,
            Self::OutsideInboxOrUnseen => !in_inbox || !seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArchiveRule;

    #[test]
    fn outside_inbox_ignores_seen_flag() {
        let rule = ArchiveRule::OutsideInbox;

        assert!(!rule.archived(true, true));
        assert!(!rule.archived(true, false));
        assert!(rule.archived(false, true));
        assert!(rule.archived(false, false));
    }

    #[test]
    fn outside_inbox_or_unseen_requires_both() {
        let rule = ArchiveRule::OutsideInboxOrUnseen;

        assert!(!rule.archived(true, true));
        assert!(rule.archived(true, false));
        assert!(rule.archived(false, true));
        assert!(rule.archived(false, false));
    }
}
