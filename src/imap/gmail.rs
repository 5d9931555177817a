//! Module dedicated to the vendor label extension.
//!
//! Servers advertising `X-GM-EXT-1` attach arbitrary labels to
//! messages through the `X-GM-LABELS` fetch/store attribute. The
//! client library does not model this attribute, so the session
//! issues the commands raw and parses the responses here. Everything
//! in this module is pure and unit-tested; the session only feeds it
//! bytes.

use once_cell::sync::Lazy;
use regex::Regex;

/// The capability advertised by servers supporting the label
/// extension.
pub const LABEL_EXT_CAPABILITY: &str = "X-GM-EXT-1";

/// The fetch/store attribute carrying message labels.
pub const LABELS_ATTRIBUTE: &str = "X-GM-LABELS";

/// The sequence id attribute within a fetch response line.
static UID_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"UID (\d+)").unwrap());

/// The labels attribute within a fetch response line. Label lists
/// never nest, so a parenthesis-free capture is enough.
static LABELS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"X-GM-LABELS \(([^)]*)\)").unwrap());

/// Parses the untagged response of a `UID FETCH … (UID X-GM-LABELS)`
/// command into `(uid, labels)` pairs, one per fetched message.
pub fn parse_fetch_labels(response: &[u8]) -> Vec<(u32, Vec<String>)> {
    let response = String::from_utf8_lossy(response);
    let mut labels_by_uid = Vec::new();

    for line in response.lines() {
        if !line.starts_with("* ") || !line.contains("FETCH") {
            continue;
        }

        let uid = match UID_ATTR
            .captures(line)
            .and_then(|captures| captures[1].parse().ok())
        {
            Some(uid) => uid,
            None => continue,
        };

        let labels = LABELS_ATTR
            .captures(line)
            .map(|captures| parse_label_list(&captures[1]))
            .unwrap_or_default();

        labels_by_uid.push((uid, labels));
    }

    labels_by_uid
}

/// Splits the inside of a label list into individual labels. Labels
/// are either atoms (possibly backslash-prefixed system labels) or
/// quoted strings with `\`-escapes.
fn parse_label_list(list: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut chars = list.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut label = String::new();

        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            label.push(escaped);
                        }
                    }
                    '"' => break,
                    c => label.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                label.push(c);
                chars.next();
            }
        }

        labels.push(label);
    }

    labels
}

/// Renders a label list as store command arguments. System labels
/// (backslash-prefixed) and plain atoms go raw; everything else is
/// quoted.
pub fn format_label_list(labels: &[String]) -> String {
    labels
        .iter()
        .map(|label| format_label(label))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_label(label: &str) -> String {
    let atom = label.starts_with('\\')
        || !label
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')' | '{' | '%' | '*'));

    if atom {
        label.to_string()
    } else {
        let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }
}
