//! Whole-world behavior: frame loop, order resolution and actor lifecycle.

use skirmish_core::prelude::*;
use skirmish_core::traits::armament::Armament;
use skirmish_core::traits::capture::Capturable;
use skirmish_core::traits::health::Health;
use skirmish_core::traits::wanders::Wanders;
use skirmish_core::traits::Capability;
use skirmish_test_utils::determinism::{run_schedule, OrderSchedule};
use skirmish_test_utils::fixtures::{
    actor_at, skirmish_session, two_player_session, world_for, P1, P2,
};

fn attack(subject: ActorId, target: ActorId) -> ClientOrder {
    ClientOrder {
        client: 1,
        order: Order::new("Attack", Some(subject)).with_target_actor(target),
    }
}

fn duel_session() -> Session {
    two_player_session(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 2, 0)])
}

#[test]
fn test_attack_on_frame_five_deals_weapon_damage() {
    let (a, b) = (ActorId(1), ActorId(2));
    let mut schedule = OrderSchedule::new();
    schedule.insert(5, vec![attack(a, b)]);

    let session = duel_session();
    let mut first = world_for(&session);
    let damage = first.actor_trait::<Armament>(a).unwrap().damage();

    let hashes_first = run_schedule(&mut first, &schedule, 4);
    assert_eq!(first.actor_trait::<Health>(b).unwrap().hp(), 100);

    let hashes_first = [hashes_first, run_schedule(&mut first, &schedule, 1)].concat();
    assert_eq!(first.frame(), 5);
    assert_eq!(first.actor_trait::<Health>(b).unwrap().hp(), 100 - damage);

    let mut second = world_for(&session);
    let hashes_second = run_schedule(&mut second, &schedule, 5);
    assert_eq!(hashes_first, hashes_second);
    assert_eq!(first.sync_hash(), second.sync_hash());
}

#[test]
fn test_order_against_actor_destroyed_on_frame_four_is_noop() {
    let (a, b) = (ActorId(1), ActorId(2));
    let session = duel_session();
    let mut with_order = world_for(&session);
    let mut without_order = world_for(&session);

    for world in [&mut with_order, &mut without_order] {
        run_schedule(world, &OrderSchedule::new(), 3);
        world.inflict_damage(None, b, 10_000);
        world.tick();
        assert_eq!(world.frame(), 4);
        assert!(world.actor(b).is_none());
    }

    with_order.receive_frame_orders([attack(a, b)]);
    let report = with_order.tick();
    without_order.tick();

    assert_eq!(report.orders_applied, 0);
    assert_eq!(report.orders_dropped, 1);
    assert_eq!(with_order.actor_trait::<Armament>(a).unwrap().target(), None);
    assert_eq!(with_order.sync_hash(), without_order.sync_hash());
}

#[test]
fn test_unrecognized_order_changes_nothing() {
    let session = skirmish_session();
    let mut a = world_for(&session);
    let mut b = world_for(&session);
    a.receive_frame_orders([ClientOrder {
        client: 1,
        order: Order::new("Moonwalk", Some(ActorId(3))).with_target_location(CPos::new(1, 1)),
    }]);
    let report = a.tick();
    b.tick();
    assert_eq!(report.orders_applied, 1);
    assert_eq!(a.sync_hash(), b.sync_hash());
}

#[test]
fn test_created_actor_visible_only_after_drain() {
    let mut world = world_for(&two_player_session(&[]));
    let id = world.create_actor("tank", CPos::new(3, 3), Some(P1)).unwrap();

    assert!(world.actor(id).is_none());
    assert_eq!(world.actors_with_trait::<Armament>().count(), 0);
    assert_eq!(world.pending_frame_end_tasks(), 1);

    world.tick();
    assert_eq!(world.pending_frame_end_tasks(), 0);
    let armed: Vec<ActorId> = world.actors_with_trait::<Armament>().map(|(a, _)| a.id()).collect();
    assert_eq!(armed, vec![id]);
}

#[test]
fn test_removed_actor_not_ticked_next_frame() {
    let (a, b) = (ActorId(1), ActorId(2));
    let mut world = world_for(&duel_session());
    world.receive_frame_orders([attack(a, b)]);
    world.tick();
    let hp_after_first_shot = world.actor_trait::<Health>(b).unwrap().hp();

    // Removed before frame 2: its retaliation must never fire.
    world.remove(b);
    let a_hp = world.actor_trait::<Health>(a).unwrap().hp();
    world.tick();
    assert!(world.actor(b).is_none());
    assert_eq!(world.actor_trait::<Health>(a).unwrap().hp(), a_hp);
    assert_eq!(hp_after_first_shot, 75);
}

fn implementing(world: &World, capability: Capability) -> Vec<ActorId> {
    world.actors_implementing(capability).map(Actor::id).collect()
}

#[test]
fn test_capability_query_sees_created_actor_after_drain() {
    let mut world = world_for(&two_player_session(&[actor_at("e1", P1, 0, 0)]));
    let id = world.create_actor("tank", CPos::new(3, 3), Some(P1)).unwrap();

    assert_eq!(implementing(&world, Capability::Tick), vec![ActorId(1)]);
    assert!(implementing(&world, Capability::NotifyKilled).is_empty());

    world.tick();
    assert_eq!(implementing(&world, Capability::Tick), vec![ActorId(1), id]);
    assert_eq!(implementing(&world, Capability::NotifyKilled), vec![id]);
    assert_eq!(implementing(&world, Capability::NotifyOwnerChanged), vec![id]);
}

#[test]
fn test_capability_query_drops_removed_actor() {
    let (a, b) = (ActorId(1), ActorId(2));
    let mut world = world_for(&duel_session());
    assert_eq!(implementing(&world, Capability::NotifyDamage), vec![a, b]);

    world.remove(b);
    assert_eq!(implementing(&world, Capability::NotifyDamage), vec![a]);

    world.tick();
    assert_eq!(implementing(&world, Capability::NotifyDamage), vec![a]);
    assert_eq!(implementing(&world, Capability::Tick), vec![a]);
}

#[test]
fn test_frame_end_chain_drains_in_same_tick() {
    let mut world = world_for(&duel_session());
    world.inflict_damage(None, ActorId(2), 10_000);

    let report = world.tick();
    assert_eq!(world.pending_frame_end_tasks(), 0);
    // RemoveActor, then CreateActor queued by the removal hook.
    assert_eq!(report.frame_end_tasks, 2);
    let husks: Vec<_> = world
        .actors()
        .filter(|a| a.type_name() == "tank.husk")
        .map(|a| (a.location(), a.owner()))
        .collect();
    assert_eq!(husks, vec![(CPos::new(2, 0), Some(P2))]);
}

#[test]
fn test_capture_transfers_ownership() {
    let session = two_player_session(&[actor_at("engineer", P1, 3, 3), actor_at("fact", P2, 6, 3)]);
    let mut world = world_for(&session);
    let (engineer, fact) = (ActorId(1), ActorId(2));

    world.receive_frame_orders([ClientOrder {
        client: 1,
        order: Order::new("CaptureActor", Some(engineer)).with_target_actor(fact),
    }]);
    for _ in 0..60 {
        world.tick();
        if world.actor(fact).unwrap().owner() == Some(P1) {
            break;
        }
    }

    assert_eq!(world.actor(fact).unwrap().owner(), Some(P1));
    assert_eq!(world.actor_trait::<Capturable>(fact).unwrap().times_captured(), 1);
    // The engineer is consumed by the capture.
    assert!(world.actor(engineer).is_none());
    // Bob owned a fact and lost it.
    assert_eq!(world.player(P2).unwrap().win_state, WinState::Lost);
    assert_eq!(world.player(P1).unwrap().win_state, WinState::Won);
}

#[test]
fn test_sell_refunds_owner_and_removes() {
    let mut world = world_for(&two_player_session(&[actor_at("fact", P1, 3, 3)]));
    let cash = world.player(P1).unwrap().cash;
    world.receive_frame_orders([ClientOrder {
        client: 1,
        order: Order::new("Sell", Some(ActorId(1))),
    }]);
    world.tick();
    assert!(world.actor(ActorId(1)).is_none());
    assert_eq!(world.player(P1).unwrap().cash, cash + 1000);
}

#[test]
fn test_wandering_uses_shared_random() {
    let session = two_player_session(&[actor_at("scout", P1, 16, 16)]);
    let mut a = world_for(&session);
    let mut b = world_for(&session);
    let start = a.rng_position();
    let hashes_a = run_schedule(&mut a, &OrderSchedule::new(), 100);
    let hashes_b = run_schedule(&mut b, &OrderSchedule::new(), 100);

    assert!(a.rng_position() > start);
    assert_eq!(hashes_a, hashes_b);
    assert!(a.actor_trait::<Wanders>(ActorId(1)).is_some());
}

#[test]
fn test_snapshot_can_cross_threads() {
    let mut world = world_for(&skirmish_session());
    world.tick();
    let snapshot = world.snapshot();
    let handle = std::thread::spawn(move || snapshot.actors.len());
    assert_eq!(handle.join().unwrap(), 10);
}
