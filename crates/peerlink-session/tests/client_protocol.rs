//! Signalling client protocol tests against an in-process relay.

mod common;

use std::time::Duration;

use common::{auth_nonce, creds, paired_credentials, signed_frame, FakeRelay};
use peerlink_session::envelope::{TYPE_ANSWER, TYPE_OFFER};
use peerlink_session::{ClientEvent, SignalError, SignallingClient};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

#[tokio::test]
async fn auth_is_the_first_frame_and_carries_nonce_and_token() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let (mut client, _events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let mut conn = relay.accept().await;
    let frame = conn.recv_json().await.expect("auth frame");
    assert_eq!(frame["type"], "auth");
    assert!(frame.get("signature").is_none());

    let data: serde_json::Value =
        serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
    assert_eq!(data["token"], "test-token");
    assert!(!data["nonce"].as_str().unwrap().is_empty());

    client.disconnect();
}

#[tokio::test]
async fn initiator_offer_echoes_the_peer_nonce_and_verifies() {
    let relay = FakeRelay::bind().await;
    let (initiator, responder) = paired_credentials();

    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let mut conn = relay.accept().await;
    let local_nonce = auth_nonce(&conn.recv_json().await.expect("auth"));

    // Peer comes online with its nonce.
    conn.send_json(&json!({"type": "peerConnect", "nonce": "RN1"})).await;
    assert!(matches!(next_event(&mut events).await, ClientEvent::PeerConnect));

    // The offer we enqueue must carry RN1 inside the signed body.
    let offer = RTCSessionDescription::offer("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".to_string()).unwrap();
    client.send_offer(&offer).unwrap();

    let frame = conn.recv_json().await.expect("offer frame");
    assert_eq!(frame["type"], "offer");
    let data = frame["data"].as_str().unwrap();
    let body: serde_json::Value = serde_json::from_str(data).unwrap();
    assert_eq!(body["nonce"], "RN1");
    assert_eq!(body["type"], "offer");
    // The responder (holder of the initiator's public key) verifies the
    // exact data bytes.
    assert!(responder.verify(frame["signature"].as_str().unwrap(), data.as_bytes()));

    // A properly signed answer comes back and surfaces as an event.
    let answer = RTCSessionDescription::answer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n".to_string()).unwrap();
    conn.send_json(&signed_frame(&responder, TYPE_ANSWER, &answer, &local_nonce)).await;
    match next_event(&mut events).await {
        ClientEvent::Answer(sd) => assert!(sd.sdp.contains("v=0")),
        other => panic!("expected Answer, got {other:?}"),
    }

    client.disconnect();
}

#[tokio::test]
async fn tampered_nonce_rejects_and_never_fires_the_offer_sink() {
    let relay = FakeRelay::bind().await;
    let (initiator, responder) = paired_credentials();

    // This side plays the responder role: first signed frame is an offer.
    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&responder));
    client.connect();

    let mut conn = relay.accept().await;
    let _local_nonce = auth_nonce(&conn.recv_json().await.expect("auth"));
    conn.send_json(&json!({"type": "peerConnect", "nonce": "RN2"})).await;
    assert!(matches!(next_event(&mut events).await, ClientEvent::PeerConnect));

    // Signed offer with a nonce that does not match what we sent in auth.
    let offer = RTCSessionDescription::offer("v=0\r\n".to_string()).unwrap();
    conn.send_json(&signed_frame(&initiator, TYPE_OFFER, &offer, "wrong")).await;

    match next_event(&mut events).await {
        ClientEvent::Error(SignalError::ProtocolViolation(_)) => {}
        other => panic!("expected ProtocolViolation, got {other:?}"),
    }
    // The reader stopped; in particular no offer ever surfaces.
    match timeout(Duration::from_millis(300), events.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(event)) => panic!("no event expected after rejection, got {event:?}"),
    }

    client.disconnect();
}

#[tokio::test]
async fn peer_connect_with_empty_nonce_is_fatal() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let mut conn = relay.accept().await;
    conn.recv_json().await.expect("auth");
    conn.send_json(&json!({"type": "peerConnect", "nonce": ""})).await;

    match next_event(&mut events).await {
        ClientEvent::Error(SignalError::ProtocolViolation(_)) => {}
        other => panic!("expected ProtocolViolation, got {other:?}"),
    }

    client.disconnect();
}

#[tokio::test]
async fn outbound_frames_keep_enqueue_order() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let mut conn = relay.accept().await;
    conn.recv_json().await.expect("auth");
    conn.send_json(&json!({"type": "peerConnect", "nonce": "RN1"})).await;
    assert!(matches!(next_event(&mut events).await, ClientEvent::PeerConnect));

    // Offer then candidates, enqueued back to back; the single writer
    // serializes them in order.
    let offer = RTCSessionDescription::offer("v=0\r\n".to_string()).unwrap();
    client.send_offer(&offer).unwrap();
    for index in 0..3 {
        let candidate = peerlink_session::envelope::IceCandidate {
            candidate: format!("candidate:{index} 1 UDP 2130706431 10.0.0.1 900{index} typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };
        client.send_ice_candidate(&candidate).unwrap();
    }

    let mut types = Vec::new();
    for _ in 0..4 {
        let frame = conn.recv_json().await.expect("frame");
        types.push(frame["type"].as_str().unwrap().to_string());
    }
    assert_eq!(types, vec!["offer", "iceCandidate", "iceCandidate", "iceCandidate"]);

    client.disconnect();
}

#[tokio::test]
async fn local_disconnect_closes_the_socket_without_an_error_event() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let mut conn = relay.accept().await;
    conn.recv_json().await.expect("auth");

    client.disconnect();

    // The relay observes the connection ending.
    assert!(timeout(WAIT, conn.recv_json()).await.expect("relay read").is_none());

    // No error is reported for a local disconnect; once the handle is gone
    // the channel just ends.
    drop(client);
    match timeout(WAIT, events.recv()).await.expect("event read") {
        None => {}
        Some(event) => panic!("unexpected event after local disconnect: {event:?}"),
    }
}

#[tokio::test]
async fn server_close_surfaces_connection_lost() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let (mut client, mut events) = SignallingClient::new(relay.url(), creds(&initiator));
    client.connect();

    let conn = relay.accept().await;
    drop(conn);

    match next_event(&mut events).await {
        ClientEvent::Error(SignalError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_relay_surfaces_dial_failed() {
    // Bind then drop to get a port with nothing listening.
    let relay = FakeRelay::bind().await;
    let url = relay.url();
    drop(relay);

    let (initiator, _) = paired_credentials();
    let (mut client, mut events) = SignallingClient::new(url, creds(&initiator));
    client.connect();

    match next_event(&mut events).await {
        ClientEvent::Error(SignalError::DialFailed(_)) => {}
        other => panic!("expected DialFailed, got {other:?}"),
    }
}
