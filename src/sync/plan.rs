//! Module dedicated to incremental fetch planning.
//!
//! Given the persisted watermark of a mailbox, the planner computes
//! the two disjoint, ascending sequence id ranges of one cycle: the
//! "old" range of previously-seen ids (metadata refresh only) and the
//! "new" range of ids to ingest.

use std::fmt;

/// An ascending, inclusive interval of sequence ids. An absent upper
/// bound means "up to the highest id existing at fetch time".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UidInterval {
    /// The first id of the interval.
    pub first: u32,

    /// The last id of the interval, unbounded when `None`.
    pub last: Option<u32>,
}

impl UidInterval {
    /// Builds the bounded interval `first..=last`.
    pub fn bounded(first: u32, last: u32) -> Self {
        Self {
            first,
            last: Some(last),
        }
    }

    /// Builds the unbounded interval starting at `first`.
    pub fn from(first: u32) -> Self {
        Self { first, last: None }
    }

    /// Returns `true` if the id belongs to the interval.
    pub fn contains(&self, uid: u32) -> bool {
        uid >= self.first && self.last.map_or(true, |last| uid <= last)
    }
}

/// Rendered in the wire syntax of uid sets, e.g. `1:100` or `101:*`.
impl fmt::Display for UidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last {
            Some(last) => write!(f, "{}:{}", self.first, last),
            None => write!(f, "{}:*", self.first),
        }
    }
}

/// The fetch plan of one mailbox cycle.
///
/// `old` and `new` are always disjoint and together cover exactly the
/// ids existing at fetch time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FetchPlan {
    /// Previously-seen ids, fetched without content. Empty right
    /// after an invalidation or on a first sync.
    pub old: Option<UidInterval>,

    /// Ids never seen under the current validity epoch, fetched with
    /// content.
    pub new: UidInterval,
}

impl FetchPlan {
    /// Computes the plan from the last seen id of a validated cursor.
    pub fn new(last_seen_uid: u32) -> Self {
        if last_seen_uid == 0 {
            Self {
                old: None,
                new: UidInterval::from(1),
            }
        } else {
            Self {
                old: Some(UidInterval::bounded(1, last_seen_uid)),
                new: UidInterval::from(last_seen_uid + 1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchPlan, UidInterval};

    #[test]
    fn plan_0() {
        let plan = FetchPlan::new(0);

        assert_eq!(plan.old, None);
        assert_eq!(plan.new, UidInterval::from(1));
    }

    #[test]
    fn plan_100() {
        let plan = FetchPlan::new(100);

        assert_eq!(plan.old, Some(UidInterval::bounded(1, 100)));
        assert_eq!(plan.new, UidInterval::from(101));
    }

    #[test]
    fn ranges_are_disjoint_and_cover_everything() {
        for last_seen in [0u32, 1, 57, 100, 4096] {
            let plan = FetchPlan::new(last_seen);

            for uid in 1..=(last_seen.saturating_mul(2) + 10) {
                let in_old = plan.old.map_or(false, |old| old.contains(uid));
                let in_new = plan.new.contains(uid);

                assert!(in_old != in_new, "uid {uid} must be in exactly one range");
                assert_eq!(in_old, uid <= last_seen);
            }
        }
    }

    #[test]
    fn wire_syntax() {
        assert_eq!(UidInterval::bounded(1, 100).to_string(), "1:100");
        assert_eq!(UidInterval::from(101).to_string(), "101:*");
    }
}
