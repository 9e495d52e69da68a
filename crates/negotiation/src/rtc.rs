//! WebRTC peer connections.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::{SctpMaxMessageSize, SettingEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use peerdrop_data_channel::{ChannelEvent, RtcSubChannel};
use peerdrop_protocol::constants::{
    CONTROL_CHANNEL_LABEL, DATA_CHANNEL_LABEL, FRAME_INDEX_LEN, MAX_CHUNK_SIZE,
};
use peerdrop_protocol::{IceCandidate, PeerRole, SdpType, SessionDescription};

use crate::error::NegotiationError;
use crate::peer::{PeerConnection, PeerConnector, PeerFuture};
use crate::types::{IceServerConfig, PeerEvent, PeerState, SubChannels};

/// Largest SCTP message we send or advertise: one full chunk frame.
const SCTP_MAX_MESSAGE_SIZE: u32 = (MAX_CHUNK_SIZE + FRAME_INDEX_LEN) as u32;

type AttachedChannel = (Arc<RtcSubChannel>, mpsc::Receiver<ChannelEvent>);

/// Builds WebRTC peer connections sharing one API instance.
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        // The default SCTP cap is 64 KiB, below one chunk frame.
        let mut setting_engine = SettingEngine::default();
        setting_engine
            .set_sctp_max_message_size_can_send(SctpMaxMessageSize::Bounded(SCTP_MAX_MESSAGE_SIZE));

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
            })
            .collect();

        Ok(Self { api, ice_servers })
    }
}

impl PeerConnector for WebRtcConnector {
    fn connect(
        &self,
        role: PeerRole,
        events: mpsc::Sender<PeerEvent>,
    ) -> PeerFuture<'_, Result<Arc<dyn PeerConnection>, NegotiationError>> {
        Box::pin(async move {
            let config = RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                ..Default::default()
            };
            let pc = Arc::new(self.api.new_peer_connection(config).await?);

            watch_candidates(&pc, events.clone());
            watch_state(&pc, events.clone());

            match role {
                PeerRole::Initiator => {
                    let control = pc
                        .create_data_channel(CONTROL_CHANNEL_LABEL, Some(ordered()))
                        .await?;
                    let data = pc
                        .create_data_channel(DATA_CHANNEL_LABEL, Some(ordered()))
                        .await?;
                    let channels = into_sub_channels(
                        RtcSubChannel::attach(control),
                        RtcSubChannel::attach(data),
                    );
                    debug!("sub-channels created");
                    let _ = events.send(PeerEvent::ChannelsReady(channels)).await;
                }
                PeerRole::Joiner => watch_remote_channels(&pc, events),
            }

            Ok(Arc::new(WebRtcPeer { pc }) as Arc<dyn PeerConnection>)
        })
    }
}

fn ordered() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    }
}

fn into_sub_channels(control: AttachedChannel, data: AttachedChannel) -> SubChannels {
    SubChannels {
        control: control.0,
        control_events: control.1,
        data: data.0,
        data_events: data.1,
    }
}

fn watch_candidates(pc: &Arc<RTCPeerConnection>, events: mpsc::Sender<PeerEvent>) {
    pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(c) = c else { return };
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    let _ = events.send(PeerEvent::LocalCandidate(candidate)).await;
                }
                Err(e) => warn!("cannot serialize local candidate: {e}"),
            }
        })
    }));
}

fn watch_state(pc: &Arc<RTCPeerConnection>, events: mpsc::Sender<PeerEvent>) {
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::New => PeerState::New,
                RTCPeerConnectionState::Connecting => PeerState::Connecting,
                RTCPeerConnectionState::Connected => PeerState::Connected,
                RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                RTCPeerConnectionState::Failed => PeerState::Failed,
                RTCPeerConnectionState::Closed => PeerState::Closed,
                _ => return,
            };
            info!(?state, "webrtc connection state");
            let _ = events.send(PeerEvent::StateChanged(state)).await;
        })
    }));
}

#[derive(Default)]
struct RemoteChannels {
    control: Option<AttachedChannel>,
    data: Option<AttachedChannel>,
}

/// Joiner side: collects both channels opened by the initiator.
fn watch_remote_channels(pc: &Arc<RTCPeerConnection>, events: mpsc::Sender<PeerEvent>) {
    let pending = Arc::new(StdMutex::new(RemoteChannels::default()));
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = events.clone();
        let pending = pending.clone();
        Box::pin(async move {
            let label = dc.label().to_string();
            let attached = RtcSubChannel::attach(dc);

            let ready = {
                let Ok(mut slots) = pending.lock() else {
                    warn!("remote channel state poisoned");
                    return;
                };
                match label.as_str() {
                    CONTROL_CHANNEL_LABEL => slots.control = Some(attached),
                    DATA_CHANNEL_LABEL => slots.data = Some(attached),
                    other => {
                        warn!(channel = other, "ignoring unexpected data channel");
                        return;
                    }
                }
                debug!(channel = %label, "remote sub-channel received");
                match (slots.control.take(), slots.data.take()) {
                    (Some(control), Some(data)) => Some(into_sub_channels(control, data)),
                    (control, data) => {
                        slots.control = control;
                        slots.data = data;
                        None
                    }
                }
            };

            if let Some(channels) = ready {
                let _ = events.send(PeerEvent::ChannelsReady(channels)).await;
            }
        })
    }));
}

/// Adds `a=max-message-size` so the remote side accepts full chunk frames.
fn advertise_max_message_size(mut sdp: String) -> String {
    if !sdp.contains("a=max-message-size:") {
        sdp.push_str(&format!("a=max-message-size:{SCTP_MAX_MESSAGE_SIZE}\r\n"));
    }
    sdp
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(NegotiationError::InvalidDescription(format!(
                "local description has type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: advertise_max_message_size(desc.sdp),
    })
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(NegotiationError::InvalidDescription(
                "rollback is not supported".into(),
            ));
        }
    };
    Ok(rtc)
}

/// A WebRTC peer connection.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl PeerConnection for WebRtcPeer {
    fn create_offer(&self) -> PeerFuture<'_, Result<SessionDescription, NegotiationError>> {
        Box::pin(async move {
            let offer = self.pc.create_offer(None).await?;
            self.pc.set_local_description(offer.clone()).await?;
            from_rtc(offer)
        })
    }

    fn create_answer(&self) -> PeerFuture<'_, Result<SessionDescription, NegotiationError>> {
        Box::pin(async move {
            let answer = self.pc.create_answer(None).await?;
            self.pc.set_local_description(answer.clone()).await?;
            from_rtc(answer)
        })
    }

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> PeerFuture<'_, Result<(), NegotiationError>> {
        Box::pin(async move {
            self.pc.set_remote_description(to_rtc(desc)?).await?;
            Ok(())
        })
    }

    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> PeerFuture<'_, Result<(), NegotiationError>> {
        Box::pin(async move {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            };
            self.pc.add_ice_candidate(init).await?;
            Ok(())
        })
    }

    fn local_description(&self) -> PeerFuture<'_, Option<SessionDescription>> {
        Box::pin(async move {
            let desc = self.pc.local_description().await?;
            from_rtc(desc).ok()
        })
    }

    fn close(&self) -> PeerFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.pc.close().await {
                debug!("peer connection close failed: {e}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrop_data_channel::SubChannel;

    #[test]
    fn max_message_size_is_appended_once() {
        let sdp = advertise_max_message_size("v=0\r\n".into());
        assert!(sdp.ends_with(&format!("a=max-message-size:{SCTP_MAX_MESSAGE_SIZE}\r\n")));
        assert_eq!(advertise_max_message_size(sdp.clone()), sdp);
    }

    #[test]
    fn rollback_is_rejected() {
        let desc = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            to_rtc(desc),
            Err(NegotiationError::InvalidDescription(_))
        ));
    }

    #[tokio::test]
    async fn initiator_reports_both_channels() {
        let connector = WebRtcConnector::new(&[]).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let peer = connector.connect(PeerRole::Initiator, tx).await.unwrap();

        let channels = loop {
            match rx.recv().await {
                Some(PeerEvent::ChannelsReady(channels)) => break channels,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        };
        assert_eq!(channels.control.label(), CONTROL_CHANNEL_LABEL);
        assert_eq!(channels.data.label(), DATA_CHANNEL_LABEL);

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("a=max-message-size:"));
        peer.close().await;
    }
}
