//! Property tests over random order schedules.

use std::collections::BTreeSet;

use proptest::prelude::*;
use skirmish_core::actor::ActorId;
use skirmish_test_utils::determinism::{find_first_divergence, run_schedule, strategies};
use skirmish_test_utils::fixtures::{skirmish_session, world_for};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_same_input_same_hashes(
        schedule in strategies::arb_schedule(vec![1, 2], 12, 40, 30)
    ) {
        let session = skirmish_session();
        let mut a = world_for(&session);
        let mut b = world_for(&session);
        let hashes_a = run_schedule(&mut a, &schedule, 50);
        let hashes_b = run_schedule(&mut b, &schedule, 50);
        prop_assert_eq!(find_first_divergence(&hashes_a, &hashes_b), None);
        prop_assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn prop_frame_end_queue_always_drained(
        schedule in strategies::arb_schedule(vec![1, 2], 12, 30, 30)
    ) {
        let mut world = world_for(&skirmish_session());
        for _ in 0..30 {
            run_schedule(&mut world, &schedule, 1);
            prop_assert_eq!(world.pending_frame_end_tasks(), 0);
            prop_assert!(world.actors().all(|a| !a.is_dead()));
        }
    }

    #[test]
    fn prop_new_actors_get_fresh_ids(
        schedule in strategies::arb_schedule(vec![1, 2], 12, 30, 40)
    ) {
        let mut world = world_for(&skirmish_session());
        let mut seen: BTreeSet<ActorId> = world.actors().map(|a| a.id()).collect();
        for _ in 0..30 {
            run_schedule(&mut world, &schedule, 1);
            let newest = seen.last().copied();
            for actor in world.actors() {
                if seen.insert(actor.id()) {
                    prop_assert!(Some(actor.id()) > newest);
                }
            }
        }
    }
}
