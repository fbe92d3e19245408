//! Supervisor behavior: retry pacing, idempotent connect, cancellation.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{auth_nonce, paired_credentials, FakeRelay};
use peerlink_session::{ConnectionState, Peer, PeerConfig};
use serde_json::json;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn retries_are_spaced_at_least_one_second_apart() {
    // A port with nothing listening: every attempt fails at dial time.
    let relay = FakeRelay::bind().await;
    let url = relay.url();
    drop(relay);

    let (initiator, _) = paired_credentials();
    let failures: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let failures_sink = failures.clone();

    let mut peer = Peer::new(
        PeerConfig {
            signalling_url: url,
            ..Default::default()
        },
        Vec::new(),
    );
    peer.on_error(move |_| {
        failures_sink.lock().unwrap().push(Instant::now());
    });
    peer.connect(Arc::new(initiator));

    tokio::time::sleep(Duration::from_millis(2600)).await;
    peer.disconnect();

    let stamps = failures.lock().unwrap().clone();
    assert!(
        stamps.len() >= 2,
        "expected at least two failed attempts, saw {}",
        stamps.len()
    );
    for pair in stamps.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(900),
            "attempts only {gap:?} apart"
        );
    }
}

#[tokio::test]
async fn connect_is_idempotent_while_running() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let peer = Peer::new(
        PeerConfig {
            signalling_url: relay.url(),
            ..Default::default()
        },
        Vec::new(),
    );
    peer.connect(Arc::new(initiator.clone()));
    peer.connect(Arc::new(initiator));
    assert!(peer.is_running());

    // Exactly one attempt dials in: one auth arrives, and no second
    // connection shows up while the first is live.
    let mut conn = relay.accept().await;
    conn.recv_json().await.expect("auth");
    assert!(
        timeout(Duration::from_millis(500), relay.accept()).await.is_err(),
        "second connect() started a second attempt"
    );

    peer.disconnect();
}

#[tokio::test]
async fn cancel_mid_negotiation_closes_both_and_stops_retrying() {
    let relay = FakeRelay::bind().await;
    let (initiator, _) = paired_credentials();

    let states: Arc<Mutex<Vec<ConnectionState>>> = Arc::new(Mutex::new(Vec::new()));
    let states_sink = states.clone();

    let mut peer = Peer::new(
        PeerConfig {
            signalling_url: relay.url(),
            ..Default::default()
        },
        Vec::new(),
    );
    peer.on_connection_state_change(move |state| {
        states_sink.lock().unwrap().push(state);
    });
    peer.connect(Arc::new(initiator));

    let mut conn = relay.accept().await;
    let _nonce = auth_nonce(&conn.recv_json().await.expect("auth"));

    // Bring the peer online so the initiator starts negotiating.
    conn.send_json(&json!({"type": "peerConnect", "nonce": "RN1"})).await;
    let offer = timeout(WAIT, conn.recv_json())
        .await
        .expect("offer wait")
        .expect("offer frame");
    assert_eq!(offer["type"], "offer");

    // Cancel in the middle of negotiation.
    peer.disconnect();

    // The socket closes promptly.
    assert!(timeout(WAIT, conn.recv_json()).await.expect("close wait").is_none());

    // And no new attempt arrives: the supervisor does not retry a local
    // cancel even past the retry interval.
    assert!(
        timeout(Duration::from_millis(1500), relay.accept()).await.is_err(),
        "supervisor retried after disconnect()"
    );

    let seen = states.lock().unwrap().clone();
    assert!(seen.contains(&ConnectionState::Connecting));
    assert!(
        !seen.contains(&ConnectionState::Connected),
        "Connected must never be emitted for a cancelled negotiation"
    );
    assert!(seen.contains(&ConnectionState::Disconnected));
}

#[tokio::test]
async fn responder_answers_an_incoming_offer() {
    let relay = FakeRelay::bind().await;
    let (initiator, responder) = paired_credentials();

    let mut peer = Peer::new(
        PeerConfig {
            signalling_url: relay.url(),
            ..Default::default()
        },
        Vec::new(),
    );
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_sink = errors.clone();
    peer.on_error(move |e| errors_sink.lock().unwrap().push(e.to_string()));
    peer.connect(Arc::new(responder));

    let mut conn = relay.accept().await;
    let local_nonce = auth_nonce(&conn.recv_json().await.expect("auth"));
    conn.send_json(&json!({"type": "peerConnect", "nonce": "RN-resp"})).await;

    // A real offer SDP is needed for the webrtc stack to accept it, so
    // borrow one from an actual peer connection.
    let (offer_side, _events) = peerlink_session::PeerTransport::new(
        &peerlink_session::TransportConfig::default(),
        &[],
    )
    .await
    .unwrap();
    offer_side.open_data_channel().await.unwrap();
    let offer = offer_side.create_offer().await.unwrap();

    conn.send_json(&common::signed_frame(
        &initiator,
        peerlink_session::envelope::TYPE_OFFER,
        &offer,
        &local_nonce,
    ))
    .await;

    // The responder answers, echoing our nonce, signed with its key.
    let answer = timeout(WAIT, conn.recv_json())
        .await
        .expect("answer wait")
        .expect("answer frame");
    assert_eq!(answer["type"], "answer", "errors: {:?}", errors.lock().unwrap());
    let body: serde_json::Value =
        serde_json::from_str(answer["data"].as_str().unwrap()).unwrap();
    assert_eq!(body["nonce"], "RN-resp");
    assert_eq!(body["type"], "answer");
    assert!(initiator.verify(
        answer["signature"].as_str().unwrap(),
        answer["data"].as_str().unwrap().as_bytes()
    ));

    offer_side.close().await;
    peer.disconnect();
}
