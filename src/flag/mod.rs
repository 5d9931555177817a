//! Module dedicated to message flags.
//!
//! A flag is a boolean-ish state token attached to a remote message
//! (seen, answered, flagged…). Flags are synchronized with
//! conversation tags through a dedicated channel, separate from
//! labels.

pub mod imap;

use std::{
    collections::BTreeSet,
    fmt,
    ops::{Deref, DerefMut},
};

/// The message flag.
///
/// The concept is the same across protocols, but the wire
/// representation may vary. This implementation keeps the usual
/// standard flags and a custom variant for everything else.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum Flag {
    /// Flag used when the message has been opened.
    Seen,

    /// Flag used when the message has been answered.
    Answered,

    /// Flag used as a bookmark. The meaning is specific to the user:
    /// it could be important, starred, to check etc.
    Flagged,

    /// Flag used when the message is marked for deletion.
    Deleted,

    /// Flag used when the message is a draft.
    Draft,

    /// Flag used for all other use cases.
    Custom(String),
}

impl Flag {
    /// Creates a custom flag.
    pub fn custom(flag: impl ToString) -> Self {
        Self::Custom(flag.to_string())
    }

    /// Returns the wire representation of the flag, as expected by
    /// store commands.
    pub fn to_imap_query(&self) -> String {
        match self {
            Flag::Seen => String::from("\\Seen"),
            Flag::Answered => String::from("\\Answered"),
            Flag::Flagged => String::from("\\Flagged"),
            Flag::Deleted => String::from("\\Deleted"),
            Flag::Draft => String::from("\\Draft"),
            Flag::Custom(flag) => flag.clone(),
        }
    }
}

/// Parse a flag from a string. If the string does not match any of
/// the existing variants, it is considered as custom.
impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        match s.trim().trim_start_matches('\\') {
            seen if seen.eq_ignore_ascii_case("seen") => Flag::Seen,
            answered if answered.eq_ignore_ascii_case("answered") => Flag::Answered,
            flagged if flagged.eq_ignore_ascii_case("flagged") => Flag::Flagged,
            deleted if deleted.eq_ignore_ascii_case("deleted") => Flag::Deleted,
            draft if draft.eq_ignore_ascii_case("draft") => Flag::Draft,
            flag => Flag::Custom(flag.into()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self {
            Flag::Seen => "seen".into(),
            Flag::Answered => "answered".into(),
            Flag::Flagged => "flagged".into(),
            Flag::Deleted => "deleted".into(),
            Flag::Draft => "draft".into(),
            Flag::Custom(flag) => flag.clone(),
        };
        write!(f, "{flag}")
    }
}

/// The set of message flags.
///
/// It uses a [`BTreeSet`] to prevent duplicates and to keep a stable
/// order, which makes set diffs deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    /// Returns the flags present in `self` but not in `other`.
    pub fn difference(&self, other: &Flags) -> Flags {
        Flags(self.0.difference(&other.0).cloned().collect())
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{flag}")?;
        }
        Ok(())
    }
}

impl Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        Flags(iter.into_iter().collect())
    }
}

impl From<Vec<Flag>> for Flags {
    fn from(flags: Vec<Flag>) -> Self {
        Flags::from_iter(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::{Flag, Flags};

    #[test]
    fn parse_flag_from_str() {
        assert_eq!(Flag::from("\\Seen"), Flag::Seen);
        assert_eq!(Flag::from("answered"), Flag::Answered);
        assert_eq!(Flag::from("Starred"), Flag::custom("Starred"));
    }

    #[test]
    fn flags_difference() {
        let left = Flags::from_iter([Flag::Seen, Flag::Answered]);
        let right = Flags::from_iter([Flag::Answered, Flag::Flagged]);

        assert_eq!(left.difference(&right), Flags::from_iter([Flag::Seen]));
        assert_eq!(right.difference(&left), Flags::from_iter([Flag::Flagged]));
    }
}
