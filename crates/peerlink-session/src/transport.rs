//! WebRTC transport adapter.
//!
//! Wraps one `RTCPeerConnection` for one session attempt and surfaces its
//! callbacks as [`TransportEvent`]s on a channel, so the session state
//! machine can drive everything from a single select loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use crate::envelope::IceCandidate;
use crate::error::SignalError;

/// Default public STUN servers.
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Label for the bidirectional message channel.
const DATA_CHANNEL_LABEL: &str = "dataChannel";

const ICE_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(5);
const ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(5);
const ICE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Transport configuration shared by every attempt.
#[derive(Clone, Default)]
pub struct TransportConfig {
    /// STUN URLs; empty means the defaults.
    pub stun_servers: Vec<String>,
    /// Extra codec descriptors registered on top of the RTP defaults.
    pub video_codecs: Vec<RTCRtpCodecParameters>,
    pub audio_codecs: Vec<RTCRtpCodecParameters>,
}

impl TransportConfig {
    fn ice_servers(&self) -> Vec<RTCIceServer> {
        let urls: Vec<String> = if self.stun_servers.is_empty() {
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.stun_servers.clone()
        };
        urls.into_iter()
            .map(|url| RTCIceServer {
                urls: vec![url],
                ..Default::default()
            })
            .collect()
    }
}

/// Supplies local media tracks to attach before negotiation.
pub trait MediaSource: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>>;
}

/// Transport callbacks, serialized onto one channel.
#[derive(Debug)]
pub enum TransportEvent {
    StateChange(RTCPeerConnectionState),
    LocalCandidate(IceCandidate),
    StringMessage(String),
    BinaryMessage(Vec<u8>),
}

/// One peer connection, owned by one session attempt.
pub struct PeerTransport {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    event_tx: mpsc::Sender<TransportEvent>,
    has_tracks: bool,
}

fn transport_err(e: impl std::fmt::Display) -> SignalError {
    SignalError::TransportFailure(e.to_string())
}

impl PeerTransport {
    /// Builds the peer connection, registers event handlers and attaches
    /// every local media track. Defaults are always registered on the
    /// media engine so track-free sessions still negotiate.
    pub async fn new(
        config: &TransportConfig,
        sources: &[Arc<dyn MediaSource>],
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), SignalError> {
        Self::with_channel_slot(config, sources, Arc::new(Mutex::new(None))).await
    }

    /// Like [`PeerTransport::new`] but adopts the caller's data-channel
    /// slot, so a supervisor can keep sending through whichever attempt is
    /// current. The slot is emptied again when the transport closes.
    pub async fn with_channel_slot(
        config: &TransportConfig,
        sources: &[Arc<dyn MediaSource>],
        data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), SignalError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport_err)?;
        for codec in &config.video_codecs {
            media
                .register_codec(codec.clone(), RTPCodecType::Video)
                .map_err(transport_err)?;
        }
        for codec in &config.audio_codecs {
            media
                .register_codec(codec.clone(), RTPCodecType::Audio)
                .map_err(transport_err)?;
        }

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(transport_err)?;

        let mut setting = SettingEngine::default();
        setting.set_ice_timeouts(
            Some(ICE_DISCONNECTED_TIMEOUT),
            Some(ICE_FAILED_TIMEOUT),
            Some(ICE_KEEPALIVE_INTERVAL),
        );

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(transport_err)?);

        let (event_tx, event_rx) = mpsc::channel(64);

        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                debug!(?state, "peer connection state");
                let _ = state_tx.send(TransportEvent::StateChange(state)).await;
            })
        }));

        let candidate_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                // None marks the end of gathering; nothing to relay.
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            let _ = candidate_tx
                                .send(TransportEvent::LocalCandidate(candidate_from_init(init)))
                                .await;
                        }
                        Err(e) => warn!("dropping unserializable candidate: {e}"),
                    }
                }
            })
        }));

        // Adopt a channel the remote side opens (responder path).
        let adopt_slot = data_channel.clone();
        let adopt_tx = event_tx.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let adopt_slot = adopt_slot.clone();
            let adopt_tx = adopt_tx.clone();
            Box::pin(async move {
                info!(label = dc.label(), "adopting remote data channel");
                wire_data_channel(&dc, adopt_tx);
                *adopt_slot.lock().await = Some(dc);
            })
        }));

        let mut has_tracks = false;
        for source in sources {
            for track in source.tracks() {
                pc.add_track(track).await.map_err(transport_err)?;
                has_tracks = true;
            }
        }

        Ok((
            Self {
                pc,
                data_channel,
                event_tx,
                has_tracks,
            },
            event_rx,
        ))
    }

    pub fn has_tracks(&self) -> bool {
        self.has_tracks
    }

    /// Shared handle to the active data channel, if any. The supervisor
    /// sends application messages through this.
    pub fn data_channel(&self) -> Arc<Mutex<Option<Arc<RTCDataChannel>>>> {
        self.data_channel.clone()
    }

    /// Opens the message channel (initiator path) and wires its sinks.
    pub async fn open_data_channel(&self) -> Result<(), SignalError> {
        let dc = self
            .pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(transport_err)?;
        wire_data_channel(&dc, self.event_tx.clone());
        *self.data_channel.lock().await = Some(dc);
        Ok(())
    }

    /// Adds a send-only video transceiver so an offer with local tracks
    /// negotiates an outbound video section.
    pub async fn add_video_sender(&self) -> Result<(), SignalError> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    /// Creates an offer and installs it as the local description.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, SignalError> {
        let offer = self.pc.create_offer(None).await.map_err(transport_err)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(transport_err)?;
        Ok(offer)
    }

    /// Creates an answer and installs it as the local description.
    pub async fn create_answer(&self) -> Result<RTCSessionDescription, SignalError> {
        let answer = self.pc.create_answer(None).await.map_err(transport_err)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(transport_err)?;
        Ok(answer)
    }

    pub async fn set_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), SignalError> {
        self.pc
            .set_remote_description(description)
            .await
            .map_err(transport_err)
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError> {
        self.pc
            .add_ice_candidate(candidate_to_init(candidate))
            .await
            .map_err(transport_err)
    }

    /// Closes the data channel and the peer connection.
    pub async fn close(&self) {
        if let Some(dc) = self.data_channel.lock().await.take() {
            let _ = dc.close().await;
        }
        if let Err(e) = self.pc.close().await {
            debug!("peer connection close: {e}");
        }
    }
}

/// Routes channel messages into the event stream, split by the per-message
/// text flag.
fn wire_data_channel(dc: &Arc<RTCDataChannel>, event_tx: mpsc::Sender<TransportEvent>) {
    let label = dc.label().to_string();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        let open_label = open_label.clone();
        Box::pin(async move {
            info!(label = %open_label, "data channel open");
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let event_tx = event_tx.clone();
        Box::pin(async move {
            let event = if msg.is_string {
                TransportEvent::StringMessage(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                TransportEvent::BinaryMessage(msg.data.to_vec())
            };
            let _ = event_tx.send(event).await;
        })
    }));
}

/// Sends a text message on a channel slot; silently drops without one.
pub(crate) async fn send_string(
    slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    message: &str,
) {
    let dc = slot.lock().await.clone();
    if let Some(dc) = dc {
        if let Err(e) = dc.send_text(message.to_string()).await {
            debug!("dropping string message: {e}");
        }
    }
}

/// Sends a binary message on a channel slot; silently drops without one.
pub(crate) async fn send_binary(slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>, message: &[u8]) {
    let dc = slot.lock().await.clone();
    if let Some(dc) = dc {
        if let Err(e) = dc.send(&Bytes::copy_from_slice(message)).await {
            debug!("dropping binary message: {e}");
        }
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn candidate_to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_without_tracks_and_produces_an_offer() {
        let (transport, _events) = PeerTransport::new(&TransportConfig::default(), &[])
            .await
            .unwrap();
        assert!(!transport.has_tracks());

        let offer = transport.create_offer().await.unwrap();
        assert!(offer.sdp.contains("v=0"));
        transport.close().await;
    }

    #[tokio::test]
    async fn data_channel_slot_starts_empty_and_fills_on_open() {
        let (transport, _events) = PeerTransport::new(&TransportConfig::default(), &[])
            .await
            .unwrap();
        assert!(transport.data_channel().lock().await.is_none());

        transport.open_data_channel().await.unwrap();
        assert!(transport.data_channel().lock().await.is_some());
        transport.close().await;
    }

    #[tokio::test]
    async fn send_without_channel_drops_silently() {
        let slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));
        send_string(&slot, "no channel yet").await;
        send_binary(&slot, &[1, 2, 3]).await;
    }

    #[test]
    fn candidate_conversion_is_lossless() {
        let init = RTCIceCandidateInit {
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.1 9999 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some("frag".to_string()),
        };
        let wire = candidate_from_init(init.clone());
        let back = candidate_to_init(wire);
        assert_eq!(back.candidate, init.candidate);
        assert_eq!(back.sdp_mid, init.sdp_mid);
        assert_eq!(back.sdp_mline_index, init.sdp_mline_index);
        assert_eq!(back.username_fragment, init.username_fragment);
    }

    #[test]
    fn default_stun_servers_are_used_when_unset() {
        let config = TransportConfig::default();
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].urls[0].starts_with("stun:"));
    }
}
