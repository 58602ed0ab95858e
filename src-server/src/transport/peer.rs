//! WebRTC API construction.
//!
//! Data channels only: no media engine codecs are registered. The ICE
//! agent is pinned to a small UDP port range so the host firewall rule
//! stays finite, with a public STUN server for reflexive candidates.

use crate::error::InitError;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

pub const PORT_RANGE_BEGIN: u16 = 50_000;
pub const PORT_RANGE_END: u16 = 50_020;

pub fn build_api() -> Result<API, InitError> {
    let mut setting_engine = SettingEngine::default();
    setting_engine
        .set_ephemeral_udp_port_range(PORT_RANGE_BEGIN, PORT_RANGE_END)
        .map_err(|e| InitError::Transport(format!("UDP port range: {}", e)))?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .build())
}

pub fn rtc_configuration() -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    }
}
