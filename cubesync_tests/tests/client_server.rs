//! Client ↔ server integration tests.
//!
//! Most run over the loopback network so every step is explicit; the last one
//! goes through real UDP sockets with both sessions on their own tasks.

use std::time::Duration;

use cubesync_client::GameClient;
use cubesync_server::GameServer;
use cubesync_shared::{
    config::{ClientConfig, MirrorPolicy, ServerConfig},
    math::{Color, Vec3},
    message::{encode, Message},
    player::{NetworkPlayer, PlayerId},
    transport::{ClientTransport, LoopbackClient},
};
use cubesync_tests::{handle, init_tracing, LoopbackWorld};
use tokio::sync::mpsc;

fn ids(client: &GameClient<LoopbackClient>) -> Vec<PlayerId> {
    let mut ids: Vec<PlayerId> = client.mirror_entities().iter().map(|p| p.id.clone()).collect();
    ids.sort();
    ids
}

#[test]
fn two_clients_join_move_and_leave() -> anyhow::Result<()> {
    init_tracing();
    let mut world = LoopbackWorld::new();

    // A joins: one player at the origin, identity delivered.
    let mut a = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut a]);
    assert_eq!(world.server.players().len(), 1);
    let a_id = world.identity_of(&a).expect("A registered");
    assert_eq!(world.server.players().get(&a_id).map(|p| p.position), Some(Vec3::ZERO));
    assert_eq!(a.local_identity(), Some(&a_id));
    assert!(a.is_active());

    // B joins.
    let mut b = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut a, &mut b]);
    assert_eq!(world.server.players().len(), 2);
    let b_id = world.identity_of(&b).expect("B registered");
    assert_ne!(a_id, b_id);

    // First broadcast: both mirrors see both players.
    world.broadcast(&mut [&mut a, &mut b]);
    let mut both = vec![a_id.clone(), b_id.clone()];
    both.sort();
    assert_eq!(ids(&a), both);
    assert_eq!(ids(&b), both);

    // A moves and publishes; the next broadcast carries it everywhere.
    let target = Vec3::new(1.0, 2.0, 3.0);
    a.move_local_entity(target)?;
    a.send_local_update();
    world.step(&mut [&mut a, &mut b]);
    assert_eq!(world.server.players().get(&a_id).map(|p| p.position), Some(target));

    world.broadcast(&mut [&mut a, &mut b]);
    for client in [&a, &b] {
        let seen = client.mirror().get(&a_id).map(|p| p.position);
        assert_eq!(seen, Some(target));
    }

    // A leaves: the server drops it and B hears about it.
    a.disconnect();
    world.step(&mut [&mut b]);
    assert_eq!(world.server.players().len(), 1);
    assert!(world.server.players().get(&a_id).is_none());
    assert_eq!(ids(&b), vec![b_id]);

    Ok(())
}

#[test]
fn rebroadcast_state_is_idempotent_for_mirrors() {
    init_tracing();
    let mut world = LoopbackWorld::new();
    let mut a = world.join(MirrorPolicy::RetainAbsent);
    let mut b = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut a, &mut b]);

    world.broadcast(&mut [&mut a, &mut b]);
    let first = a.mirror_entities().to_vec();
    world.broadcast(&mut [&mut a, &mut b]);
    assert_eq!(a.mirror_entities(), first.as_slice());
    assert_eq!(a.mirror().len(), 2);
}

#[test]
fn identities_are_not_reused_after_leave() {
    init_tracing();
    let mut world = LoopbackWorld::new();
    let mut a = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut a]);
    let first = world.identity_of(&a).expect("A registered");

    a.disconnect();
    world.step(&mut []);
    assert!(world.server.players().is_empty());

    let mut c = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut c]);
    let second = world.identity_of(&c).expect("C registered");
    assert_ne!(first, second);
}

#[test]
fn lost_disconnect_notice_leaves_ghost_unless_pruning() {
    init_tracing();
    let mut world = LoopbackWorld::new();
    let mut a = world.join(MirrorPolicy::RetainAbsent);
    let mut keep = world.join(MirrorPolicy::RetainAbsent);
    let mut prune = world.join(MirrorPolicy::PruneAbsent);
    world.step(&mut [&mut a, &mut keep, &mut prune]);
    world.broadcast(&mut [&mut a, &mut keep, &mut prune]);
    let a_id = world.identity_of(&a).expect("A registered");

    // The notice about A never reaches the observers.
    world.net.set_delivery(handle(&keep), false);
    world.net.set_delivery(handle(&prune), false);
    a.disconnect();
    world.step(&mut [&mut keep, &mut prune]);
    world.net.set_delivery(handle(&keep), true);
    world.net.set_delivery(handle(&prune), true);

    world.broadcast(&mut [&mut keep, &mut prune]);
    assert_eq!(world.server.players().len(), 2);
    assert!(keep.mirror().get(&a_id).is_some(), "retained ghost");
    assert_eq!(keep.mirror().len(), 3);
    assert!(prune.mirror().get(&a_id).is_none());
    assert_eq!(prune.mirror().len(), 2);
}

#[test]
fn severed_link_is_cleaned_up() {
    init_tracing();
    let mut world = LoopbackWorld::new();
    let mut a = world.join(MirrorPolicy::RetainAbsent);
    let mut b = world.join(MirrorPolicy::RetainAbsent);
    world.step(&mut [&mut a, &mut b]);
    world.broadcast(&mut [&mut a, &mut b]);
    let a_id = world.identity_of(&a).expect("A registered");

    world.net.sever(handle(&a));
    world.step(&mut [&mut a, &mut b]);

    assert!(a.is_torn_down());
    assert_eq!(world.server.registry().len(), 1);
    assert!(world.server.players().get(&a_id).is_none());
    assert!(b.mirror().get(&a_id).is_none());
}

#[test]
fn client_cannot_move_someone_else() -> anyhow::Result<()> {
    init_tracing();
    let mut world = LoopbackWorld::new();
    let mut b = world.join(MirrorPolicy::RetainAbsent);
    let mut rogue = world.net.connect();
    world.step(&mut [&mut b]);
    let b_id = world.identity_of(&b).expect("B registered");

    // A raw connection claims to be B.
    let forged = NetworkPlayer::new(b_id.clone(), Vec3::new(0.0, 1.0, 0.0), Color::new(1.0, 0.0, 0.0));
    rogue.send(&encode(&Message::PlayerUpdate { player: forged }))?;
    rogue.send(&encode(&Message::PlayerDisconnect {
        server_id: b_id.clone(),
    }))?;
    world.step(&mut [&mut b]);

    let server_b = world.server.players().get(&b_id).map(|p| p.position);
    assert_eq!(server_b, Some(Vec3::ZERO));
    assert_eq!(world.server.players().len(), 2);
    assert!(b.is_active());
    Ok(())
}

/// Full socket path: server and two clients each on their own task.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn udp_sessions_converge() -> anyhow::Result<()> {
    init_tracing();

    let mut server = GameServer::bind(ServerConfig {
        port: 0,
        tick_hz: 100,
        broadcast_interval_ms: 50,
        color_seed: Some(1),
        ..Default::default()
    })
    .await?;
    let port = server.local_addr()?.port();
    let server_task = tokio::spawn(async move {
        server.run_until(tokio::time::sleep(Duration::from_millis(1800))).await;
    });

    let client_cfg = ClientConfig {
        server_port: port,
        tick_hz: 100,
        publish_interval_ms: 50,
        ..Default::default()
    };

    // A keeps steering to a fixed spot for its whole session.
    let target = Vec3::new(1.0, 2.0, 3.0);
    let (a_tx, a_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while a_tx.send(target).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });
    let mut a = GameClient::connect(client_cfg.clone()).await?;
    let a_task = tokio::spawn(async move {
        a.run_until(a_rx, tokio::time::sleep(Duration::from_millis(1300))).await;
        a
    });

    // B leaves first, so its mirror still holds A at the end.
    let (_b_tx, b_rx) = mpsc::channel(1);
    let mut b = GameClient::connect(client_cfg).await?;
    let b_task = tokio::spawn(async move {
        b.run_until(b_rx, tokio::time::sleep(Duration::from_millis(900))).await;
        b
    });

    let b = b_task.await?;
    let a = a_task.await?;
    server_task.await?;

    let a_id = a.local_identity().cloned().expect("A got an identity");
    let b_id = b.local_identity().cloned().expect("B got an identity");
    assert_ne!(a_id, b_id);

    assert_eq!(b.mirror().get(&a_id).map(|p| p.position), Some(target));
    assert!(b.mirror().get(&b_id).is_some());

    // A saw B's departure.
    assert!(a.mirror().get(&b_id).is_none());
    assert!(a.mirror().get(&a_id).is_some());
    Ok(())
}
