//! Recording a game to disk and playing it back.

use std::path::Path;

use skirmish_core::order::MouseInput;
use skirmish_core::prelude::*;
use skirmish_core::replay::{ReplayHeader, ReplayRecord};
use skirmish_test_utils::fixtures::{actor_at, rules, solo_session, P1, P2};

/// Play a short solo game with a fight and a pause, recording it to `path`.
/// Returns the per-frame hashes.
fn record_game(path: &Path, frames: u32) -> Vec<u64> {
    let session = solo_session(&[
        actor_at("tank", P1, 2, 2),
        actor_at("tank", P2, 9, 2),
        actor_at("scout", P1, 16, 16),
    ]);
    let settings = LockstepSettings::default();
    let header = ReplayHeader::new(session.clone(), &settings, 1);
    let recorder = ReplayRecorder::create(path, &header).unwrap();

    let mut world = World::new(rules(), &session, &settings).unwrap();
    let mut manager =
        OrderManager::new(Box::new(EchoConnection::new(1)), &session, settings).with_recorder(recorder);
    manager.start_game(&mut world).unwrap();

    let mut hashes = Vec::new();
    while world.frame() < frames {
        match world.frame() {
            4 => {
                let orders = world.orders_for_input(
                    &[ActorId(1)],
                    CPos::new(9, 2),
                    &MouseInput::right_click(),
                    Some(ActorId(2)),
                );
                for order in orders {
                    world.issue_order(order);
                }
            }
            6 => world.issue_order(Order::chat("pushing east")),
            _ => {}
        }
        if manager.try_tick(&mut world).unwrap() {
            hashes.push(world.sync_hash());
        }
    }
    manager.finish_recording(&world).unwrap();
    hashes
}

#[test]
fn test_recorded_game_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.skrp");
    let hashes = record_game(&path, 60);

    let replay = Replay::load(&path).unwrap();
    assert_eq!(replay.final_frame, 60);
    assert_eq!(replay.final_hash, *hashes.last().unwrap());
    assert_eq!(replay.packet_count(), 60);
    let recorded: Vec<u64> = replay.sync_hashes().into_values().collect();
    assert_eq!(recorded, hashes);

    let mut player = ReplayPlayer::new(replay, rules()).unwrap();
    assert!(player.verify().unwrap());
    assert!(player.is_finished());
    assert_eq!(player.manager().chat().len(), 1);
    // The attack happened.
    assert!(player.world().actors().all(|a| a.id() != ActorId(2)));
}

#[test]
fn test_seek_backwards_replays_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.skrp");
    let hashes = record_game(&path, 30);

    let mut player = ReplayPlayer::new(Replay::load(&path).unwrap(), rules()).unwrap();
    player.seek(20).unwrap();
    assert_eq!(player.world().sync_hash(), hashes[19]);
    player.seek(5).unwrap();
    assert_eq!(player.current_frame(), 5);
    assert_eq!(player.world().sync_hash(), hashes[4]);
    assert!((player.progress_percent() - 100.0 / 6.0).abs() < 1e-9);

    player.toggle_pause();
    assert!(!player.advance().unwrap());
    player.toggle_pause();
    assert!(player.advance().unwrap());
    assert_eq!(player.current_frame(), 6);
}

#[test]
fn test_tampered_hash_is_desync() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.skrp");
    record_game(&path, 20);

    let mut replay = Replay::load(&path).unwrap();
    for record in &mut replay.records {
        if let ReplayRecord::Sync { frame: 12, hash, .. } = record {
            *hash ^= 0xdead;
        }
    }
    let mut player = ReplayPlayer::new(replay, rules()).unwrap();
    assert!(matches!(
        player.seek(20),
        Err(GameError::DesyncDetected { frame: 12, .. })
    ));
    assert_eq!(player.current_frame(), 12);
}

#[test]
fn test_truncated_file_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.skrp");
    record_game(&path, 20);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        Replay::load(&path),
        Err(GameError::ReplayTruncated(_))
    ));
}

#[test]
fn test_unfinished_recording_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crash.skrp");
    {
        let session = solo_session(&[]);
        let settings = LockstepSettings::default();
        let header = ReplayHeader::new(session.clone(), &settings, 1);
        let mut world = World::new(rules(), &session, &settings).unwrap();
        let mut manager = OrderManager::new(Box::new(EchoConnection::new(1)), &session, settings)
            .with_recorder(ReplayRecorder::create(&path, &header).unwrap());
        manager.start_game(&mut world).unwrap();
        for _ in 0..5 {
            manager.try_tick(&mut world).unwrap();
        }
        // Dropped without finish_recording.
    }
    assert!(matches!(
        Replay::load(&path),
        Err(GameError::ReplayTruncated(_))
    ));
}
