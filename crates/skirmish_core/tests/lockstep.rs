//! Order manager behavior across peers: the frame barrier, disconnects,
//! protocol anomalies and desync detection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use skirmish_core::connection::HubConnection;
use skirmish_core::prelude::*;
use skirmish_core::traits::mobile::Mobile;
use skirmish_test_utils::determinism::LockstepHarness;
use skirmish_test_utils::fixtures::{actor_at, rules, solo_session, two_player_session, P1, P2};

/// Loops our own traffic back and lets the test inject a peer's.
#[derive(Debug, Clone, Default)]
struct ScriptedConnection {
    inbox: Arc<Mutex<VecDeque<ConnectionEvent>>>,
}

impl ScriptedConnection {
    fn inject(&self, event: ConnectionEvent) {
        self.inbox.lock().unwrap().push_back(event);
    }

    fn peer_orders(&self, frame: u32, orders: Vec<Order>) {
        self.inject(ConnectionEvent::Orders {
            client: 2,
            frame,
            packet: OrderPacket::new(orders),
        });
    }
}

impl Connection for ScriptedConnection {
    fn local_client_id(&self) -> ClientId {
        1
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Orders
    }

    fn send(&mut self, frame: u32, packet: &OrderPacket) -> Result<()> {
        self.inject(ConnectionEvent::Orders {
            client: 1,
            frame,
            packet: packet.clone(),
        });
        Ok(())
    }

    fn send_immediate(&mut self, orders: &[Order]) -> Result<()> {
        self.inject(ConnectionEvent::Immediate {
            client: 1,
            orders: orders.to_vec(),
        });
        Ok(())
    }

    fn send_sync(&mut self, _frame: u32, _hash: u64, _defeat_state: u64) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> Vec<ConnectionEvent> {
        self.inbox.lock().unwrap().drain(..).collect()
    }
}

fn scripted_game(actors: &[skirmish_core::session::ActorReference]) -> (ScriptedConnection, OrderManager, World) {
    let session = two_player_session(actors);
    let settings = LockstepSettings::default();
    let connection = ScriptedConnection::default();
    let mut world = World::new(rules(), &session, &settings).unwrap();
    let mut manager = OrderManager::new(Box::new(connection.clone()), &session, settings);
    manager.start_game(&mut world).unwrap();
    (connection, manager, world)
}

fn hub_pair(session: &Session) -> (LocalHub, [(OrderManager, World); 2]) {
    let hub = LocalHub::new();
    let settings = LockstepSettings::default();
    let connections: [HubConnection; 2] = [hub.connect(1), hub.connect(2)];
    let peers = connections.map(|connection| {
        let mut world = World::new(rules(), session, &settings).unwrap();
        let mut manager = OrderManager::new(Box::new(connection), session, settings.clone());
        manager.start_game(&mut world).unwrap();
        (manager, world)
    });
    (hub, peers)
}

#[test]
fn test_barrier_holds_until_every_peer_sent() {
    let session = two_player_session(&[]);
    let (_hub, [(mut a, mut world_a), (mut b, mut world_b)]) = hub_pair(&session);

    // Only the startup packets exist, so peer 1 runs ahead by the latency.
    for _ in 0..10 {
        a.try_tick(&mut world_a).unwrap();
    }
    assert_eq!(world_a.frame(), 3);
    assert!(!a.is_ready_for_frame(4));
    assert_eq!(a.missing_clients(4), vec![2]);

    // Peer 2 executing frame 1 sends its orders for frame 4.
    assert!(b.try_tick(&mut world_b).unwrap());
    assert!(a.try_tick(&mut world_a).unwrap());
    assert_eq!(world_a.frame(), 4);
    assert!(!a.try_tick(&mut world_a).unwrap());
}

#[test]
fn test_peer_orders_apply_on_scheduled_frame_everywhere() {
    let session = two_player_session(&[actor_at("e1", P1, 0, 0), actor_at("e1", P2, 9, 9)]);
    let mut harness = LockstepHarness::new(&session, &LockstepSettings::default()).unwrap();

    harness.run_until(2).unwrap();
    let bob = harness.peer_mut(2).unwrap();
    bob.world.issue_order(
        Order::new("Move", Some(ActorId(2))).with_target_location(CPos::new(9, 12)),
    );
    harness.run_until(40).unwrap();

    for peer in &harness.peers {
        assert_eq!(peer.world.actor(ActorId(2)).unwrap().location(), CPos::new(9, 12));
        assert!(peer.world.actor_trait::<Mobile>(ActorId(2)).unwrap().is_idle());
    }
    let hashes = harness.hashes();
    assert_eq!(hashes[0], hashes[1]);
}

#[test]
fn test_disconnect_substitutes_empty_orders() {
    let session = two_player_session(&[]);
    let mut harness = LockstepHarness::new(&session, &LockstepSettings::default()).unwrap();
    harness.run_until(5).unwrap();

    // Peer 2 had sent orders up to frame 5 + latency.
    harness.hub.disconnect(2);
    harness.run_until(30).unwrap();

    let alice = harness.peer(1).unwrap();
    assert_eq!(alice.world.frame(), 30);
    assert_eq!(alice.manager.disconnected().get(&2), Some(&9));
    let bob = alice.world.player(P2).unwrap();
    assert!(bob.disconnected);
    assert_eq!(bob.win_state, WinState::Lost);
    assert_eq!(harness.peer(2).unwrap().manager.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn test_desync_detected_exactly_at_frame_ten() {
    let session = two_player_session(&[actor_at("e1", P1, 0, 0), actor_at("e1", P2, 9, 9)]);
    let mut harness = LockstepHarness::new(&session, &LockstepSettings::default()).unwrap();
    harness.run_until(9).unwrap();
    assert_eq!(harness.hashes()[0], harness.hashes()[1]);

    // Corrupt peer 2 outside the order stream; it lands in frame 10.
    harness.peer_mut(2).unwrap().world.give_cash(P1, 1);

    // A desync is terminal, so keep only the first error each peer reports.
    let mut errors = BTreeMap::new();
    for _ in 0..10 {
        for peer in &mut harness.peers {
            if let Err(e) = peer.manager.try_tick(&mut peer.world) {
                errors.entry(peer.manager.local_client_id()).or_insert(e);
            }
        }
        if errors.len() == 2 {
            break;
        }
    }

    assert_eq!(errors.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    for error in errors.values() {
        assert!(matches!(error, GameError::DesyncDetected { frame: 10, .. }));
    }
    for peer in &harness.peers {
        assert_eq!(peer.world.frame(), 10);
        assert_eq!(peer.manager.out_of_sync_frame(), Some(10));
    }
    // Terminal: no further frames run.
    let alice = &mut harness.peers[0];
    assert!(alice.manager.try_tick(&mut alice.world).is_err());
    assert_eq!(alice.world.frame(), 10);
}

#[test]
fn test_late_packet_is_discarded() {
    let (conn, mut manager, mut world) = scripted_game(&[actor_at("e1", P2, 5, 5)]);
    for frame in 1..=3 {
        conn.peer_orders(frame, Vec::new());
    }
    for _ in 0..3 {
        assert!(manager.try_tick(&mut world).unwrap());
    }

    // Frame 2 already ran; this must never apply.
    conn.peer_orders(2, vec![Order::new("Move", Some(ActorId(1))).with_target_location(CPos::new(0, 0))]);
    conn.peer_orders(4, Vec::new());
    assert!(manager.try_tick(&mut world).unwrap());
    assert_eq!(manager.last_tick().unwrap().orders_applied, 0);
    assert!(world.actor_trait::<Mobile>(ActorId(1)).unwrap().is_idle());
}

#[test]
fn test_duplicate_packet_keeps_first() {
    let (conn, mut manager, mut world) = scripted_game(&[actor_at("e1", P2, 5, 5)]);
    let move_to = |x| Order::new("Move", Some(ActorId(1))).with_target_location(CPos::new(x, 5));
    conn.peer_orders(1, vec![move_to(8)]);
    conn.peer_orders(1, vec![move_to(2)]);

    assert!(manager.try_tick(&mut world).unwrap());
    assert_eq!(manager.last_tick().unwrap().orders_applied, 1);
    let mobile = world.actor_trait::<Mobile>(ActorId(1)).unwrap();
    assert_eq!(mobile.destinations().back(), Some(&CPos::new(8, 5)));
}

#[test]
fn test_orders_from_unknown_client_ignored() {
    let (conn, mut manager, mut world) = scripted_game(&[]);
    conn.inject(ConnectionEvent::Orders {
        client: 77,
        frame: 1,
        packet: OrderPacket::empty(),
    });
    assert!(!manager.try_tick(&mut world).unwrap());
    conn.peer_orders(1, Vec::new());
    assert!(manager.try_tick(&mut world).unwrap());
}

#[test]
fn test_orders_for_foreign_actor_rejected() {
    let (conn, mut manager, mut world) = scripted_game(&[actor_at("e1", P1, 5, 5)]);
    // Client 2 tries to move Alice's rifleman.
    conn.peer_orders(
        1,
        vec![Order::new("Move", Some(ActorId(1))).with_target_location(CPos::new(9, 9))],
    );
    assert!(manager.try_tick(&mut world).unwrap());
    let report = manager.last_tick().unwrap();
    assert_eq!(report.orders_applied, 0);
    assert_eq!(report.orders_dropped, 1);
}

#[test]
fn test_chat_from_peer_logged() {
    let (conn, mut manager, mut world) = scripted_game(&[]);
    conn.inject(ConnectionEvent::Immediate {
        client: 2,
        orders: vec![Order::chat("gl hf")],
    });
    manager.try_tick(&mut world).unwrap();
    assert_eq!(manager.chat().len(), 1);
    assert_eq!(manager.chat()[0].client, 2);
    assert_eq!(manager.chat()[0].text, "gl hf");
}

#[test]
fn test_desync_writes_sync_report() {
    let dir = tempfile::tempdir().unwrap();
    let session = two_player_session(&[actor_at("e1", P1, 0, 0)]);
    let settings = LockstepSettings {
        sync_report_dir: Some(dir.path().to_path_buf()),
        ..LockstepSettings::default()
    };
    let mut harness = LockstepHarness::new(&session, &settings).unwrap();
    harness.run_until(3).unwrap();
    harness.peer_mut(1).unwrap().world.give_cash(P2, 5);

    for _ in 0..6 {
        for peer in &mut harness.peers {
            let _ = peer.manager.try_tick(&mut peer.world);
        }
    }

    let report = std::fs::read_to_string(dir.path().join("syncreport-1-4.txt")).unwrap();
    assert!(report.contains("frame 4"));
}

#[test]
fn test_zero_latency_refuses_to_start() {
    let session = solo_session(&[actor_at("e1", P1, 0, 0)]);
    let settings = LockstepSettings {
        order_latency: 0,
        ..LockstepSettings::default()
    };
    let mut world = World::new(rules(), &session, &settings).unwrap();
    let mut manager = OrderManager::new(Box::new(EchoConnection::new(1)), &session, settings);

    assert!(matches!(
        manager.start_game(&mut world),
        Err(GameError::InvalidState(_))
    ));
    assert_eq!(world.frame(), 0);
}
