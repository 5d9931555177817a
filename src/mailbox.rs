//! Module dedicated to mailboxes and synchronization cursors.
//!
//! A mailbox is a named remote folder plus its persisted cursor. The
//! cursor is the durability watermark of the synchronization: it is
//! written exactly once per processed mailbox, after all
//! reconciliation completed.

use std::fmt;

use tracing::{debug, warn};

/// The synchronization cursor of a mailbox.
///
/// The pair identifies a position in a validity epoch: sequence ids
/// cached under one validity token are meaningless under another.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Cursor {
    /// The server-issued validity token of the epoch the cursor
    /// belongs to.
    pub uid_validity: u32,

    /// The highest sequence id processed within the epoch. Zero means
    /// nothing has been processed yet.
    pub last_seen_uid: u32,
}

impl Cursor {
    pub fn new(uid_validity: u32, last_seen_uid: u32) -> Self {
        Self {
            uid_validity,
            last_seen_uid,
        }
    }

    /// Checks the cursor against the validity token reported by the
    /// server for the current session.
    ///
    /// A mismatch means the mailbox was invalidated: cached sequence
    /// ids no longer refer to the same messages, and the mailbox must
    /// be resynchronized from scratch. This is expected server
    /// behavior, hence a warning and not an error.
    pub fn validate(self, reported_uid_validity: u32) -> Cursor {
        if self.uid_validity == reported_uid_validity {
            return self;
        }

        if self.uid_validity == 0 {
            debug!(
                reported = reported_uid_validity,
                "first synchronization of the mailbox, starting from scratch",
            );
        } else {
            warn!(
                cached = self.uid_validity,
                reported = reported_uid_validity,
                "uid validity does not match, invalidating cache and resyncing messages",
            );
        }

        Cursor::new(reported_uid_validity, 0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid_validity, self.last_seen_uid)
    }
}

/// The remote folder being synchronized, together with its persisted
/// cursor and enablement flag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Mailbox {
    /// The identifier of the account owning the mailbox.
    pub account_id: String,

    /// The remote folder name.
    pub name: String,

    /// The persisted cursor.
    pub cursor: Cursor,

    /// Whether the mailbox takes part in synchronization cycles.
    pub sync_enabled: bool,
}

impl Mailbox {
    pub fn new(account_id: impl ToString, name: impl ToString) -> Self {
        Self {
            account_id: account_id.to_string(),
            name: name.to_string(),
            cursor: Cursor::default(),
            sync_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn validate_keeps_cursor_on_matching_token() {
        let cursor = Cursor::new(555, 100);
        assert_eq!(cursor.validate(555), cursor);
    }

    #[test]
    fn validate_resets_last_seen_uid_on_mismatch() {
        let cursor = Cursor::new(555, 100);
        assert_eq!(cursor.validate(556), Cursor::new(556, 0));
    }
}
