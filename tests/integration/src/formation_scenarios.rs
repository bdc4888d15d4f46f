//! Formation scenarios over in-memory links
//!
//! # Test Scenarios
//!
//! 1. **Host normalization**: scheme and trailing slash variants land on one record
//! 2. **Self counting**: the local vehicle is addressed and counted once
//! 3. **Mode switch brake**: leaving formation brakes every enabled member exactly once
//! 4. **Join approval**: a latched request is answered and counted
//! 5. **Latch stability**: repeated snapshots do not re-prompt an answered key
//! 6. **Re-added peer**: a removed link's late events never touch the new record
//! 7. **Request retry**: a requester may ask again once the vehicle drops the request

use crate::test_utils::*;
use convoy_c2_router::DispatchOutcome;
use convoy_core::NodeRole;
use convoy_mesh::{LinkEvent, LinkEventKind, LinkId};
use convoy_unit_status::{FormationMode, LinkStatus, NodeConfigPatch, PeerNode};
use std::sync::{Arc, Mutex};

const FLEET: &str = r#"
    [node]
    self_host = "192.168.4.1"

    [formation]
    group_id = 2
    group_name = "alpha"
"#;

#[test]
fn test_host_variants_collapse_to_one_peer() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    coordinator.add_peer("http://10.0.0.5/", &NodeConfigPatch::default()).unwrap();
    coordinator.add_peer(" 10.0.0.5 ", &NodeConfigPatch::default()).unwrap();
    coordinator
        .add_peer("ws://10.0.0.5", &NodeConfigPatch {
            role: Some(NodeRole::Leader),
            ..Default::default()
        })
        .unwrap();

    let nodes = coordinator.snapshot();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].host, "10.0.0.5");
    assert_eq!(nodes[0].config.role, NodeRole::Leader);
    assert_eq!(nodes[0].status, LinkStatus::Connecting);

    // One link only, created by the first add
    assert_eq!(receivers.lock().unwrap().len(), 2);

    coordinator.remove_peer("http://10.0.0.5").unwrap();
    assert!(coordinator.snapshot().is_empty());
    assert!(was_shut_down(&receivers, &peer("10.0.0.5")));
    assert!(coordinator.remove_peer("10.0.0.5").is_err());
}

#[test]
fn test_self_addressed_once() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    for host in ["10.0.0.5", "10.0.0.6", "192.168.4.1"] {
        coordinator.add_peer(host, &NodeConfigPatch::default()).unwrap();
        open(&mut coordinator, peer(host));
    }
    open(&mut coordinator, LinkId::Local);
    assert_eq!(coordinator.member_count(), 3);

    coordinator.set_mode(FormationMode::Formation);
    assert_eq!(coordinator.dispatch(0.5, 0.0), Some(DispatchOutcome::Drive { peers: 2 }));

    assert!(sent_frames(&receivers, &peer("192.168.4.1")).is_empty());
    let local = sent_frames(&receivers, &LinkId::Local);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0]["role"], "leader");
    assert_eq!(local[0]["index"], 0);
    assert_eq!(local[0]["count"], 3);

    for host in ["10.0.0.5", "10.0.0.6"] {
        let frames = sent_frames(&receivers, &peer(host));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["count"], 3);
        assert_eq!(frames[0]["group_id"], 2);
        assert_eq!(frames[0]["name"], "alpha");
    }
}

#[test]
fn test_leaving_formation_brakes_once() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    for host in ["10.0.0.5", "10.0.0.6", "10.0.0.7"] {
        coordinator.add_peer(host, &NodeConfigPatch::default()).unwrap();
        open(&mut coordinator, peer(host));
    }
    coordinator
        .update_node_config("10.0.0.7", &NodeConfigPatch::enabled(false))
        .unwrap();

    coordinator.set_mode(FormationMode::Formation);
    coordinator.dispatch(0.8, 0.2);
    for host in ["10.0.0.5", "10.0.0.6", "10.0.0.7"] {
        sent_frames(&receivers, &peer(host));
    }

    coordinator.set_mode(FormationMode::Solo);
    for host in ["10.0.0.5", "10.0.0.6"] {
        let frames = sent_frames(&receivers, &peer(host));
        assert_eq!(frames.len(), 1, "{} frames", host);
        assert_eq!(frames[0]["enable"], false);
        assert_eq!(frames[0]["v"], 0.0);
        assert_eq!(frames[0]["w"], 0.0);
    }
    assert!(sent_frames(&receivers, &peer("10.0.0.7")).is_empty());

    // Solo input drives only the local vehicle
    coordinator.dispatch(0.3, 0.0);
    assert!(sent_frames(&receivers, &peer("10.0.0.5")).is_empty());
    assert_eq!(coordinator.heartbeat(), None);
}

#[test]
fn test_offline_peer_skipped_but_counted() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    coordinator.add_peer("10.0.0.5", &NodeConfigPatch::default()).unwrap();
    coordinator.add_peer("10.0.0.6", &NodeConfigPatch::default()).unwrap();
    open(&mut coordinator, peer("10.0.0.5"));

    coordinator.set_mode(FormationMode::Formation);
    assert_eq!(coordinator.dispatch(0.1, 0.1), Some(DispatchOutcome::Drive { peers: 1 }));
    assert!(sent_frames(&receivers, &peer("10.0.0.6")).is_empty());
    assert_eq!(sent_frames(&receivers, &peer("10.0.0.5"))[0]["count"], 3);
}

#[test]
fn test_join_request_approval_flow() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    open(&mut coordinator, LinkId::Local);
    let renders = Arc::new(Mutex::new(0usize));
    let counter = renders.clone();
    coordinator.set_update_handler(Box::new(move |_: &[PeerNode], _: &convoy_unit_status::FormationState| {
        *counter.lock().unwrap() += 1;
    }));

    coordinator.set_mode(FormationMode::Formation);
    local_frame(
        &mut coordinator,
        r#"{"type":"group_state","group":{"enabled":true,"role":"leader","count":2,
            "request_pending":true,"request_from":"AA:BB:CC:DD:EE:02","request_from_ip":"192.168.4.7",
            "request_name":"rover-2","request_group":2}}"#,
    );
    let request = coordinator.formation().request.clone().unwrap();
    assert_eq!(request.from_ip, "192.168.4.7");
    assert_eq!(request.name, "rover-2");

    coordinator.respond_to_join_request(true).unwrap();
    assert_eq!(coordinator.formation().member_count, 3);
    assert!(coordinator.formation().request.is_none());
    assert_eq!(*renders.lock().unwrap(), 4);

    let local = sent_frames(&receivers, &LinkId::Local);
    let reply = local.iter().find(|f| f["type"] == "group_request_reply").unwrap();
    assert_eq!(reply["accept"], true);
    assert_eq!(reply["count"], 3);
}

#[test]
fn test_answered_prompts_stay_closed() {
    let (mut coordinator, _) = coordinator(FLEET);
    coordinator.set_mode(FormationMode::Formation);
    let request = r#"{"type":"group_state","group":{"role":"leader","request_pending":true,
        "request_from":"AA:BB:CC:DD:EE:02","request_group":2}}"#;

    local_frame(&mut coordinator, request);
    coordinator.respond_to_join_request(false).unwrap();
    for _ in 0..5 {
        local_frame(&mut coordinator, request);
        assert!(coordinator.formation().request.is_none());
    }
    assert!(coordinator.respond_to_join_request(true).is_err());

    // A different requester still gets through
    local_frame(
        &mut coordinator,
        r#"{"type":"group_state","group":{"role":"leader","request_pending":true,
            "request_from":"AA:BB:CC:DD:EE:03","request_group":2}}"#,
    );
    assert!(coordinator.formation().request_pending());
}

#[test]
fn test_invite_accept_then_follow() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    coordinator.add_peer("10.0.0.5", &NodeConfigPatch::default()).unwrap();
    open(&mut coordinator, peer("10.0.0.5"));

    local_frame(
        &mut coordinator,
        r#"{"type":"telemetry","pitch":1.0,"roll":0.0,"yaw":90.0,
            "group":{"role":"follower","invite_pending":true,"invite_group":7,"invite_name":"bravo"}}"#,
    );
    assert_eq!(coordinator.formation().invite.as_ref().unwrap().name, "bravo");

    coordinator.respond_to_invite(true).unwrap();
    let state = coordinator.formation();
    assert_eq!(state.mode, FormationMode::Formation);
    assert_eq!((state.group_id, state.group_name.as_str()), (7, "bravo"));
    assert_eq!(state.role, Some(NodeRole::Follower));

    // Followers do not drive the group
    assert_eq!(coordinator.dispatch(1.0, 0.0), Some(DispatchOutcome::Skipped));
    assert_eq!(coordinator.heartbeat(), None);
    assert!(sent_frames(&receivers, &peer("10.0.0.5")).is_empty());

    // The same invite never prompts again
    local_frame(
        &mut coordinator,
        r#"{"type":"group_state","group":{"invite_pending":true,"invite_group":7}}"#,
    );
    assert!(coordinator.formation().invite.is_none());
}

#[test]
fn test_readded_peer_survives_stale_link() {
    let (mut coordinator, receivers) = coordinator(FLEET);
    coordinator.add_peer("10.0.0.5", &NodeConfigPatch::default()).unwrap();
    let old = coordinator.mesh().link_generation(&peer("10.0.0.5")).unwrap();
    coordinator.remove_peer("10.0.0.5").unwrap();
    coordinator.add_peer("10.0.0.5", &NodeConfigPatch::default()).unwrap();
    open(&mut coordinator, peer("10.0.0.5"));

    // The removed link gives up on its connect attempt
    coordinator.handle_link_event(LinkEvent::new(peer("10.0.0.5"), old, LinkEventKind::Error("refused".into())));
    coordinator.handle_link_event(LinkEvent::new(peer("10.0.0.5"), old, LinkEventKind::Closed));
    assert_eq!(coordinator.snapshot()[0].status, LinkStatus::Online);

    coordinator.set_mode(FormationMode::Formation);
    assert_eq!(coordinator.dispatch(0.2, 0.0), Some(DispatchOutcome::Drive { peers: 1 }));
    assert_eq!(sent_frames(&receivers, &peer("10.0.0.5")).len(), 1);
}

#[test]
fn test_join_request_retry_after_vehicle_clears_it() {
    let (mut coordinator, _) = coordinator(FLEET);
    coordinator.set_mode(FormationMode::Formation);
    let request = r#"{"type":"group_state","group":{"role":"leader","request_pending":true,
        "request_from":"AA:BB:CC:DD:EE:02","request_group":3}}"#;

    local_frame(&mut coordinator, request);
    coordinator.respond_to_join_request(false).unwrap();
    local_frame(
        &mut coordinator,
        r#"{"type":"group_state","group":{"role":"leader","request_pending":false}}"#,
    );

    // Same requester, same group, asking again
    local_frame(&mut coordinator, request);
    assert!(coordinator.formation().request_pending());
    coordinator.respond_to_join_request(true).unwrap();
}
