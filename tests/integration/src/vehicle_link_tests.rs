//! Links against a real WebSocket vehicle
//!
//! # Test Scenarios
//!
//! 1. **Status query**: every open starts with `group_query`
//! 2. **Fixed-delay reconnect**: a dropped peer goes offline, waits the
//!    reconnect delay, then connects again
//! 3. **Local handshake**: an invite pushed by the local vehicle is answered
//!    over the same link

use crate::test_utils::*;
use convoy_c2_router::{FleetRuntime, FormationCoordinator};
use convoy_core::Config;
use convoy_mesh::{LinkEventKind, LinkId, WsLinkSpawner};
use convoy_unit_status::{FormationMode, LinkStatus, NodeConfigPatch};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const RECONNECT: Duration = Duration::from_millis(1500);

fn config_for(self_host: Option<&str>) -> Config {
    let mut config = Config::default();
    config.node.self_host = self_host.map(str::to_string);
    config.link.reconnect_delay_ms = RECONNECT.as_millis() as u64;
    config
}

#[tokio::test]
async fn test_peer_reconnects_after_fixed_delay() {
    init_tracing();
    let mut server = VehicleServer::start().await.unwrap();
    let host = server.host();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let spawner = WsLinkSpawner::new(events_tx, RECONNECT);
    let mut coordinator = FormationCoordinator::new(&config_for(None), Box::new(spawner));
    coordinator.add_peer(&format!("http://{}/", host), &NodeConfigPatch::default()).unwrap();
    let id = LinkId::Peer(host.clone());

    let opened = pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |e, _| {
        e.id == id && e.kind == LinkEventKind::Opened
    })
    .await;
    assert!(opened.is_some());
    assert_eq!(coordinator.snapshot()[0].status, LinkStatus::Online);
    assert_eq!(server.next_frame(Duration::from_secs(2)).await.unwrap()["type"], "group_query");

    server.drop_clients();
    let offline = pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |_, c| {
        c.snapshot()[0].status == LinkStatus::Offline
    })
    .await
    .unwrap();

    let connecting = pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |_, c| {
        c.snapshot()[0].status == LinkStatus::Connecting
    })
    .await
    .unwrap();
    let waited = connecting - offline;
    assert!(waited >= Duration::from_millis(1400), "reconnected after {:?}", waited);
    assert!(waited < Duration::from_millis(3000), "reconnected after {:?}", waited);

    pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |_, c| {
        c.snapshot()[0].status == LinkStatus::Online
    })
    .await
    .unwrap();
    assert_eq!(server.next_frame(Duration::from_secs(2)).await.unwrap()["type"], "group_query");
    assert_eq!(server.connections(), 2);

    coordinator.shutdown();
}

#[tokio::test]
async fn test_local_invite_handshake() {
    init_tracing();
    let mut server = VehicleServer::start().await.unwrap();
    let host = server.host();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let spawner = WsLinkSpawner::new(events_tx, RECONNECT);
    let mut coordinator = FormationCoordinator::new(&config_for(Some(&host)), Box::new(spawner));

    pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |e, _| {
        e.id == LinkId::Local && e.kind == LinkEventKind::Opened
    })
    .await
    .unwrap();
    assert_eq!(coordinator.mesh().local_status(), LinkStatus::Online);
    assert_eq!(server.next_frame(Duration::from_secs(2)).await.unwrap()["type"], "group_query");

    server.push(
        r#"{"type":"group_state","group":{"enabled":false,"group_id":1,"role":"follower",
            "invite_pending":true,"invite_group":4,"invite_name":"delta"}}"#,
    );
    pump_until(&mut coordinator, &mut events, Duration::from_secs(5), |_, c| {
        c.formation().invite.is_some()
    })
    .await
    .unwrap();

    coordinator.respond_to_invite(true).unwrap();
    let reply = server.next_frame(Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["type"], "group_invite_reply");
    assert_eq!(reply["accept"], true);
    assert_eq!(coordinator.formation().group_id, 4);

    coordinator.shutdown();
}

#[tokio::test]
async fn test_runtime_drives_real_peer() {
    init_tracing();
    let mut server = VehicleServer::start().await.unwrap();
    let host = server.host();

    let (runtime, handle) = FleetRuntime::new(&config_for(None));
    let task = tokio::spawn(runtime.run());
    handle.add_peer(&host, NodeConfigPatch::default()).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (nodes, _, _) = handle.snapshot().await.unwrap();
        if nodes[0].status == LinkStatus::Online {
            break;
        }
        assert!(Instant::now() < deadline, "peer never came online");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.next_frame(Duration::from_secs(2)).await.unwrap()["type"], "group_query");

    // Store the vector first so no heartbeat carries a stale one
    handle.dispatch(0.4, 0.0).await.unwrap();
    handle.set_mode(FormationMode::Formation).await.unwrap();
    handle.dispatch(0.4, 0.0).await.unwrap();

    // The dispatch plus heartbeats within half a second
    let mut commands = 0;
    while let Some(frame) = server.next_frame(Duration::from_millis(500)).await {
        assert_eq!(frame["type"], "group_cmd");
        assert_eq!(frame["v"], 0.4);
        commands += 1;
        if commands == 3 {
            break;
        }
    }
    assert_eq!(commands, 3);

    // Heartbeats already in flight may precede the brake
    handle.emergency_stop().await.unwrap();
    let mut braked = false;
    while let Some(frame) = server.next_frame(Duration::from_secs(1)).await {
        if frame["enable"] == false {
            assert_eq!(frame["v"], 0.0);
            braked = true;
            break;
        }
    }
    assert!(braked);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
