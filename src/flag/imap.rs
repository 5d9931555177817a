//! Module dedicated to IMAP flag conversions.

use super::{Flag, Flags};

impl Flags {
    /// Builds the space-separated wire representation of the set, as
    /// expected by store commands.
    pub fn to_imap_query(&self) -> String {
        self.iter().fold(String::new(), |mut flags, flag| {
            if !flags.is_empty() {
                flags.push(' ')
            }
            flags.push_str(&flag.to_imap_query());
            flags
        })
    }
}

/// Converts a wire flag into a [`Flag`]. Session-only flags like
/// `\Recent` carry no synchronizable state and are rejected, which
/// lets callers drop them with a `flat_map`.
impl TryFrom<&imap::types::Flag<'_>> for Flag {
    type Error = ();

    fn try_from(flag: &imap::types::Flag<'_>) -> Result<Self, ()> {
        match flag {
            imap::types::Flag::Seen => Ok(Flag::Seen),
            imap::types::Flag::Answered => Ok(Flag::Answered),
            imap::types::Flag::Flagged => Ok(Flag::Flagged),
            imap::types::Flag::Deleted => Ok(Flag::Deleted),
            imap::types::Flag::Draft => Ok(Flag::Draft),
            imap::types::Flag::Custom(flag) => Ok(Flag::Custom(flag.to_string())),
            _ => Err(()),
        }
    }
}

impl From<&[imap::types::Flag<'_>]> for Flags {
    fn from(imap_flags: &[imap::types::Flag<'_>]) -> Self {
        Flags::from_iter(imap_flags.iter().flat_map(Flag::try_from))
    }
}
