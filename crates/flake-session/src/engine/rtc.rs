//! Engine backed by the `webrtc` crate.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use webrtc::{
    api::APIBuilder,
    data_channel::{
        data_channel_init::RTCDataChannelInit, data_channel_message::DataChannelMessage,
        RTCDataChannel,
    },
    ice_transport::{ice_candidate::RTCIceCandidate, ice_server::RTCIceServer},
    peer_connection::{
        configuration::RTCConfiguration,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
};

use super::{
    ChannelEvents, ConnectionEvents, DataChannel, Engine, EngineConnection, EngineResult,
};
use crate::config::{IceServer, SessionConfig};
use crate::descriptor::{SdpKind, SessionDescription};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default)]
pub struct RtcEngine;

impl RtcEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for RtcEngine {
    async fn create_connection(
        &self,
        config: &SessionConfig,
        events: Arc<dyn ConnectionEvents>,
    ) -> EngineResult<Arc<dyn EngineConnection>> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|err| EngineError::Connection(err.to_string()))?,
        );
        wire_connection(&pc, events);
        Ok(Arc::new(RtcConnection { pc }))
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn wire_connection(pc: &Arc<RTCPeerConnection>, events: Arc<dyn ConnectionEvents>) {
    let negotiation_events = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let events = negotiation_events.clone();
        Box::pin(async move {
            events.on_negotiation_needed().await;
        })
    }));

    let candidate_events = events.clone();
    let weak_pc: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let weak_pc = weak_pc.clone();
        Box::pin(async move {
            match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => events.on_ice_candidate(init.candidate).await,
                    Err(err) => trace!(error = %err, "unserializable ice candidate"),
                },
                // End of candidates: the local description now carries them all.
                None => {
                    let Some(pc) = weak_pc.upgrade() else {
                        return;
                    };
                    match pc.local_description().await.map(from_rtc) {
                        Some(Ok(local)) => events.on_gathering_complete(local).await,
                        Some(Err(err)) => warn!(error = %err, "unusable local description"),
                        None => warn!("gathering finished without a local description"),
                    }
                }
            }
        })
    }));

    let channel_events = events;
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = channel_events.clone();
        Box::pin(async move {
            events.on_remote_channel(dc.label().to_string()).await;
        })
    }));
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: Arc<dyn ChannelEvents>) {
    {
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                events.on_open().await;
            })
        }));
    }

    {
        let events = events.clone();
        dc.on_close(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                events.on_close().await;
            })
        }));
    }

    {
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                events.on_message(msg.data).await;
            })
        }));
    }

    dc.on_error(Box::new(move |err| {
        let events = events.clone();
        Box::pin(async move {
            events.on_error(err.to_string()).await;
        })
    }));
}

fn from_rtc(desc: RTCSessionDescription) -> EngineResult<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(EngineError::LocalDescription(
                "description has no type".into(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, String> {
    let converted = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => return Err("rollback descriptions are not supported".into()),
    };
    converted.map_err(|err| err.to_string())
}

pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl EngineConnection for RtcConnection {
    async fn create_offer(&self) -> EngineResult<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| EngineError::Offer(err.to_string()))?;
        from_rtc(offer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> EngineResult<()> {
        let desc = to_rtc(description).map_err(EngineError::LocalDescription)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|err| EngineError::LocalDescription(err.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|desc| from_rtc(desc).ok())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> EngineResult<()> {
        let desc = to_rtc(description).map_err(EngineError::RemoteDescription)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|err| EngineError::RemoteDescription(err.to_string()))
    }

    async fn create_channel(
        &self,
        label: &str,
        events: Arc<dyn ChannelEvents>,
    ) -> EngineResult<Arc<dyn DataChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| EngineError::Channel(err.to_string()))?;
        wire_channel(&dc, events);
        debug!(channel = %label, "data channel created");
        Ok(Arc::new(RtcChannel {
            label: label.to_string(),
            dc,
        }))
    }

    async fn close(&self) -> EngineResult<()> {
        self.pc
            .close()
            .await
            .map_err(|err| EngineError::Close(err.to_string()))
    }
}

pub struct RtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: Bytes) -> EngineResult<()> {
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Send(err.to_string()))
    }

    async fn close(&self) -> EngineResult<()> {
        self.dc
            .close()
            .await
            .map_err(|err| EngineError::Close(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn converts_answer_for_the_engine() {
        let rtc = to_rtc(SessionDescription::answer(MINIMAL_SDP)).expect("answer converts");
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);
        assert_eq!(rtc.sdp, MINIMAL_SDP);
        let back = from_rtc(rtc).expect("round trip");
        assert_eq!(back.kind, SdpKind::Answer);
    }

    #[test]
    fn rollback_is_refused() {
        let desc = SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc(desc).is_err());
    }

    #[test]
    fn ice_server_credentials_are_forwarded() {
        let server = IceServer {
            urls: vec!["turn:relay.example:3478".into()],
            username: "user".into(),
            credential: "secret".into(),
        };
        let rtc = to_rtc_ice_server(&server);
        assert_eq!(rtc.urls, server.urls);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "secret");
    }
}
