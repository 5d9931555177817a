//! Module dedicated to tag and label mapping.
//!
//! Labels are remote, possibly hierarchical classification strings;
//! tags are their local normalized counterparts attached to
//! conversations. The [`TagMapper`] owns the normalization in both
//! directions. Flags map through a separate channel: the reserved
//! pseudo-tag `seen` never becomes a label.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::flag::Flag;

/// The remote label marking a message as present in the inbox.
pub const INBOX_LABEL: &str = "\\Inbox";

/// The pseudo-label pre-seeded into the reverse map, even when never
/// seen remotely.
pub const IMPORTANT_LABEL: &str = "\\Important";

/// The pseudo-tag mapped to the seen flag instead of a label.
pub const SEEN_TAG: &str = "seen";

/// Tags that must never be derived from labels.
const RESERVED_TAGS: [&str; 3] = ["all-mail", "inbox", "sent"];

/// Bracketed provider folder prefix, e.g. `[Gmail]/`.
static PROVIDER_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[^\]]*\]/").unwrap());

/// Character runs that cannot appear in a tag slug.
static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Normalizes an arbitrary string into the canonical tag slug form:
/// lowercase, non-alphanumeric runs collapsed into single hyphens,
/// edges trimmed.
pub fn clean_tag(s: &str) -> String {
    let s = s.to_lowercase();
    NON_SLUG.replace_all(&s, "-").trim_matches('-').to_string()
}

/// Normalizes a remote label into a local tag name.
///
/// Returns `None` for labels that map to reserved or blank tags.
pub fn to_tag(label: &str) -> Option<String> {
    let label = label.strip_prefix('\\').unwrap_or(label);
    let label = PROVIDER_PREFIX.replace(label, "");
    let tag = clean_tag(&label);

    if tag.is_empty() || RESERVED_TAGS.contains(&tag.as_str()) {
        return None;
    }

    Some(tag)
}

/// The tag ⇄ label mapper of one session.
///
/// The reverse map is seeded from the label inventory listed at
/// session open, plus the fixed `important` pseudo-label.
#[derive(Clone, Debug, Default)]
pub struct TagMapper {
    /// Reverse map from tag slug to the remote label it was derived
    /// from.
    labels: HashMap<String, String>,
}

impl TagMapper {
    /// Builds a mapper from the remote label inventory.
    pub fn new(labels: impl IntoIterator<Item = impl ToString>) -> Self {
        let mut map: HashMap<String, String> = HashMap::new();

        for label in labels {
            let label = label.to_string();
            if let Some(tag) = to_tag(&label) {
                map.insert(tag, label);
            }
        }

        map.insert(String::from("important"), String::from(IMPORTANT_LABEL));

        Self { labels: map }
    }

    /// Normalizes a remote label into a local tag name. See
    /// [`to_tag`].
    pub fn to_tag(&self, label: &str) -> Option<String> {
        to_tag(label)
    }

    /// Normalizes a flag into a local tag name.
    pub fn flag_to_tag(&self, flag: &Flag) -> Option<String> {
        to_tag(&flag.to_string())
    }

    /// Reverse lookup from a tag name to the remote label it stands
    /// for.
    ///
    /// The `seen` pseudo-tag maps to a flag, not a label, and yields
    /// `None` here.
    pub fn to_label(&self, tag: &str) -> Option<&str> {
        if tag == SEEN_TAG {
            return None;
        }

        self.labels.get(tag).map(String::as_str)
    }

    /// Reverse lookup from a tag name to the flag it stands for.
    pub fn to_flag(&self, tag: &str) -> Option<Flag> {
        (tag == SEEN_TAG).then_some(Flag::Seen)
    }
}
