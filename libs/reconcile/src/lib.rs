//! Reconciliation loop primitives.
//!
//! This library provides the pieces shared by polling and watch-driven
//! reconciliation:
//!
//! - **Scheduling**: run a named task now and on every tick of an interval
//!   ([`TickerTaskScheduler`]), or record it for manual triggering in tests
//!   ([`ManualScheduler`]).
//! - **Set differences**: compare the last-known and current views of a
//!   collection ([`diff_sets`]).
//!
//! # Invariants
//!
//! - Scheduled tasks are idempotent; overlapping runs are tolerated
//! - A failing task never stops future ticks
//! - Diffs are deterministic and preserve input order

use std::collections::BTreeSet;
use std::time::Duration;

mod scheduler;

pub use scheduler::{
    run_once, BoxedTask, ManualScheduler, TaskScheduler, TickerTaskScheduler, MIN_TICK,
};

/// Difference between an old and a new view of a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    /// Present in new but not in old.
    pub added: Vec<T>,

    /// Present in old but not in new.
    pub removed: Vec<T>,
}

impl<T> SetDiff<T> {
    /// Returns true if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute the set difference between `old` and `new`.
///
/// Duplicates collapse to their first occurrence and output follows input order.
pub fn diff_sets<T>(old: &[T], new: &[T]) -> SetDiff<T>
where
    T: Ord + Clone,
{
    let old_set: BTreeSet<&T> = old.iter().collect();
    let new_set: BTreeSet<&T> = new.iter().collect();

    let mut seen = BTreeSet::new();
    let added = new
        .iter()
        .filter(|item| !old_set.contains(item) && seen.insert(*item))
        .cloned()
        .collect();

    let mut seen = BTreeSet::new();
    let removed = old
        .iter()
        .filter(|item| !new_set.contains(item) && seen.insert(*item))
        .cloned()
        .collect();

    SetDiff { added, removed }
}

/// Default route polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default metrics drain interval.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay before re-subscribing to a closed watch stream.
pub const DEFAULT_REWATCH_DELAY: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["a", "b"], &["b", "c"], &["c"], &["a"])]
    #[case(&["a"], &["a"], &[], &[])]
    #[case(&[], &["a", "a", "b"], &["a", "b"], &[])]
    #[case(&["x", "y"], &[], &[], &["x", "y"])]
    fn test_diff_sets(
        #[case] old: &[&str],
        #[case] new: &[&str],
        #[case] added: &[&str],
        #[case] removed: &[&str],
    ) {
        let diff = diff_sets(old, new);
        assert_eq!(diff.added, added);
        assert_eq!(diff.removed, removed);
    }

    #[test]
    fn test_diff_sets_empty() {
        let diff = diff_sets(&[1, 2, 3], &[3, 2, 1]);
        assert!(diff.is_empty());
    }
}
