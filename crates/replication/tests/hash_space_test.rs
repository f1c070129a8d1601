//! Ownership table properties.
//!
//! # Test Strategy
//!
//! 1. **Properties**: determinism, owner list length and uniqueness, minimal
//!    movement on join and leave, over arbitrary member lists
//! 2. **Scenario**: three members, a fourth joins; only moved segments get
//!    transfer tasks and the rest stay byte-identical

use corelib::node::{Member, NodeId};
use corelib::partitioner::Xxh3Partitioner;
use corelib::segment::Segment;
use proptest::prelude::*;
use replication::{plan_transfers, HashSpace};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

fn member(id: u128) -> Member {
    Member::new(NodeId(id), format!("10.0.0.{id}:11222"))
}

fn space(num_segments: u32) -> HashSpace {
    HashSpace::new(Arc::new(Xxh3Partitioner), num_segments, 16)
}

fn members_strategy() -> impl Strategy<Value = Vec<Member>> {
    prop::collection::btree_set(1u128..10_000, 0..12)
        .prop_map(|ids| ids.into_iter().map(member).collect())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn assignment_is_deterministic(members in members_strategy(), num_owners in 1usize..5) {
        let hs = space(32);
        let first = hs.compute_assignment(&members, num_owners);
        let second = hs.compute_assignment(&members, num_owners);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(
            bincode::serialize(&first).unwrap(),
            bincode::serialize(&second).unwrap()
        );
    }

    #[test]
    fn owner_lists_have_capped_length_and_no_duplicates(
        members in members_strategy(),
        num_owners in 1usize..5,
        keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 1..20),
    ) {
        let hs = space(32);
        let table = hs.compute_assignment(&members, num_owners);
        let expected = num_owners.min(members.len());
        for key in &keys {
            let owners = hs.owners_of(key, &table);
            prop_assert_eq!(owners.len(), expected);
            let unique: HashSet<_> = owners.iter().collect();
            prop_assert_eq!(unique.len(), owners.len());
        }
    }

    #[test]
    fn join_only_moves_segments_to_the_joiner(
        members in members_strategy(),
        joiner in 10_000u128..20_000,
        num_owners in 1usize..4,
    ) {
        let hs = space(64);
        let before = hs.compute_assignment(&members, num_owners);
        let mut grown = members.clone();
        grown.push(member(joiner));
        let after = hs.compute_assignment(&grown, num_owners);

        for segment in before.changed_segments(&after) {
            prop_assert!(after.is_owner(segment, &member(joiner)));
        }
    }

    #[test]
    fn leave_only_moves_segments_of_the_leaver(
        members in members_strategy().prop_filter("need a member", |m| !m.is_empty()),
        pick in any::<prop::sample::Index>(),
        num_owners in 1usize..4,
    ) {
        let hs = space(64);
        let leaver = members[pick.index(members.len())].clone();
        let before = hs.compute_assignment(&members, num_owners);
        let shrunk: Vec<_> = members.iter().filter(|m| **m != leaver).cloned().collect();
        let after = hs.compute_assignment(&shrunk, num_owners);

        for segment in before.changed_segments(&after) {
            prop_assert!(before.is_owner(segment, &leaver));
        }
    }
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn test_fourth_member_join_moves_only_needed_segments() {
    let hs = space(4);
    let (a, b, c, d) = (member(1), member(2), member(3), member(4));

    let before = hs.compute_assignment(&[a.clone(), b.clone(), c.clone()], 2);
    let after = hs.compute_assignment(&[a, b, c, d.clone()], 2);

    let changed: BTreeSet<Segment> = before.changed_segments(&after).into_iter().collect();
    let plan = plan_transfers(&before, &after);
    let with_tasks: BTreeSet<Segment> = plan.tasks.iter().map(|t| t.segment).collect();

    assert_eq!(changed, with_tasks, "exactly the moved segments generate tasks");
    assert!(plan.tasks.iter().all(|t| t.destination == d));
    assert!(plan.orphaned.is_empty());

    for segment in Segment::all(4).filter(|s| !changed.contains(s)) {
        assert_eq!(
            bincode::serialize(before.owners(segment)).unwrap(),
            bincode::serialize(after.owners(segment)).unwrap(),
            "segment {segment} must be untouched"
        );
    }
}
