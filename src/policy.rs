//! # Group Priority Policy
//!
//! Fixed table mapping groups to priority tiers. Two groups are elevated:
//! timekeeping above user input. Every other gid, named or not, runs at
//! baseline.
//!
//! Scheduling is cooperative, so a tier only decides which of several
//! ready tasks is dispatched first. It never preempts a running task.

use crate::task::{GroupId, Priority};

/// Groups that run above baseline.
pub const ELEVATED_GROUPS: &[(GroupId, Priority)] = &[
    (GroupId::REALTIME, Priority::Timekeeping),
    (GroupId::INTERFACE, Priority::Interface),
];

/// Resolve a group to its priority tier. Total: unlisted gids resolve
/// to [`Priority::Baseline`].
pub const fn priority_of(gid: GroupId) -> Priority {
    let mut i = 0;
    while i < ELEVATED_GROUPS.len() {
        let (group, priority) = ELEVATED_GROUPS[i];
        if group.as_raw() == gid.as_raw() {
            return priority;
        }
        i += 1;
    }
    Priority::Baseline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_tiers() {
        assert_eq!(priority_of(GroupId::REALTIME), Priority::Timekeeping);
        assert_eq!(priority_of(GroupId::INTERFACE), Priority::Interface);
    }

    #[test]
    fn test_elevated_groups_outrank_every_baseline_group() {
        for raw in 0..=u8::MAX {
            let gid = GroupId::from_raw(raw);
            let priority = priority_of(gid);
            if ELEVATED_GROUPS.iter().any(|(g, _)| *g == gid) {
                assert!(priority > Priority::Baseline);
            } else {
                assert_eq!(priority, Priority::Baseline, "gid {gid}");
            }
        }
    }

    #[test]
    fn test_unknown_gid_is_baseline() {
        assert_eq!(priority_of(GroupId::from_raw(200)), Priority::Baseline);
        assert_eq!(priority_of(GroupId::app(0)), Priority::Baseline);
        assert_eq!(priority_of(GroupId::LAMP_EFFECT), Priority::Baseline);
    }

    #[test]
    fn test_policy_never_yields_idle() {
        for raw in 0..=u8::MAX {
            assert_ne!(priority_of(GroupId::from_raw(raw)), Priority::Idle);
        }
    }
}
