//! A minimal SDP-backed media session.
//!
//! Enough of RFC 4566 to drive DESCRIBE → SETUP → PLAY: media lines,
//! `a=control`, `a=range` and the connection address. No RTP is received
//! here; an application that wants media wraps or replaces these types.

use super::session::{ByeHandler, MediaSession, MediaSubsession};
use super::transport::TransportParams;
use crate::{Result, RtspError};
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

/// One `m=` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescription {
    /// `video`, `audio`, `application`, ...
    pub media_type: String,
    /// Transport port; 0 for most unicast RTSP streams.
    pub port: u16,
    /// `RTP/AVP`, `RAW/RAW/UDP`, ...
    pub protocol: String,
    /// First format (payload type).
    pub format: String,
    /// Media-level `c=` line.
    pub connection: Option<String>,
    /// `a=` lines by name.
    pub attributes: HashMap<String, String>,
}

impl MediaDescription {
    /// A media section with no connection or attributes.
    pub fn new(media_type: &str, port: u16, protocol: &str, format: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            port,
            protocol: protocol.to_string(),
            format: format.to_string(),
            connection: None,
            attributes: HashMap::new(),
        }
    }

    /// Value of `a=<name>:...`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Parsed session description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescription {
    /// `v=`
    pub version: i32,
    /// `o=`
    pub origin: Option<String>,
    /// `s=`
    pub session_name: Option<String>,
    /// Session-level `c=`
    pub connection: Option<String>,
    /// `t=`
    pub time: Option<String>,
    /// Session-level `a=` lines by name.
    pub attributes: HashMap<String, String>,
    /// `m=` sections in order.
    pub media: Vec<MediaDescription>,
}

fn insert_attribute(attributes: &mut HashMap<String, String>, value: &str) {
    match value.split_once(':') {
        Some((name, val)) => attributes.insert(name.to_string(), val.to_string()),
        None => attributes.insert(value.to_string(), String::new()),
    };
}

impl SessionDescription {
    /// Parses an SDP body. Lines that are not `<type>=<value>` are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut sdp = SessionDescription::default();
        let mut current_media: Option<MediaDescription> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (typ, value) = match line.split_once('=') {
                Some((t, v)) if t.len() == 1 => (t, v.trim()),
                _ => {
                    debug!("Skipping SDP line '{}'", line);
                    continue;
                }
            };

            match (typ, current_media.as_mut()) {
                ("v", _) => sdp.version = i32::from_str(value)?,
                ("o", _) => sdp.origin = Some(value.to_string()),
                ("s", _) => sdp.session_name = Some(value.to_string()),
                ("c", Some(media)) => media.connection = Some(value.to_string()),
                ("c", None) => sdp.connection = Some(value.to_string()),
                ("t", _) => sdp.time = Some(value.to_string()),
                ("m", _) => {
                    if let Some(media) = current_media.take() {
                        sdp.media.push(media);
                    }

                    // <media> <port>[/<count>] <proto> <fmt> ...
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 4 {
                        return Err(RtspError::Protocol(format!(
                            "invalid SDP media line '{}'",
                            value
                        )));
                    }
                    let port = parts[1].split('/').next().unwrap_or_default();
                    current_media = Some(MediaDescription::new(
                        parts[0],
                        u16::from_str(port)?,
                        parts[2],
                        parts[3],
                    ));
                }
                ("a", Some(media)) => insert_attribute(&mut media.attributes, value),
                ("a", None) => insert_attribute(&mut sdp.attributes, value),
                _ => {}
            }
        }

        if let Some(media) = current_media {
            sdp.media.push(media);
        }
        Ok(sdp)
    }

    /// First media section of `media_type`.
    pub fn get_media(&self, media_type: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media_type == media_type)
    }

    /// Value of a session-level attribute.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Address part of `IN IP4 224.2.0.1/127`.
fn connection_address(connection: &str) -> Option<IpAddr> {
    let address = connection.split_whitespace().nth(2)?;
    address.split('/').next()?.parse().ok()
}

/// `npt=10-20.5`, `npt=now-`, `clock=20240101T000000Z-...`
#[derive(Debug, Clone, Default, PartialEq)]
struct RangeAttribute {
    play_start: f64,
    play_end: f64,
    absolute_start: Option<String>,
    absolute_end: Option<String>,
}

fn parse_range_attribute(value: Option<&str>) -> RangeAttribute {
    let mut range = RangeAttribute {
        play_end: -1.0,
        ..Default::default()
    };
    let Some(value) = value else {
        return range;
    };

    if let Some(clock) = value.trim().strip_prefix("clock=") {
        let (start, end) = clock.split_once('-').unwrap_or((clock, ""));
        range.absolute_start = Some(start.to_string()).filter(|s| !s.is_empty());
        range.absolute_end = Some(end.to_string()).filter(|s| !s.is_empty());
    } else if let Some(npt) = value.trim().strip_prefix("npt=") {
        let (start, end) = npt.split_once('-').unwrap_or((npt, ""));
        range.play_start = start.trim().parse().unwrap_or(0.0);
        range.play_end = end.trim().parse().unwrap_or(-1.0);
    }
    range
}

/// [`MediaSubsession`] for one `m=` section.
#[derive(Debug)]
pub struct SdpSubsession {
    media: MediaDescription,
    client_port: u16,
    multicast: bool,
    session_id: Option<String>,
    transport: Option<TransportParams>,
    initiated: bool,
    bye_handler: Arc<Mutex<Option<ByeHandler>>>,
}

impl SdpSubsession {
    /// The `m=` section this subsession was built from.
    pub fn media(&self) -> &MediaDescription {
        &self.media
    }

    /// Session id recorded after SETUP.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// What the server agreed to in SETUP.
    pub fn transport(&self) -> Option<&TransportParams> {
        self.transport.as_ref()
    }

    /// Shared slot an RTCP receiver uses to report BYE.
    pub fn bye_handler(&self) -> Arc<Mutex<Option<ByeHandler>>> {
        Arc::clone(&self.bye_handler)
    }
}

#[async_trait]
impl MediaSubsession for SdpSubsession {
    async fn initiate(&mut self) -> Result<()> {
        if self.protocol_name().is_empty() {
            return Err(RtspError::SubsessionInitiateFailed(format!(
                "{} stream uses unsupported protocol '{}'",
                self.media.media_type, self.media.protocol
            )));
        }
        if self.client_port == 0 {
            return Err(RtspError::SubsessionInitiateFailed(format!(
                "no client port for {} stream",
                self.media.media_type
            )));
        }
        self.initiated = true;
        Ok(())
    }

    fn protocol_name(&self) -> &str {
        let protocol = self.media.protocol.to_ascii_uppercase();
        if protocol.starts_with("RTP/") {
            "RTP"
        } else if protocol == "UDP" || protocol == "RAW/RAW/UDP" {
            "UDP"
        } else {
            ""
        }
    }

    fn medium_name(&self) -> &str {
        &self.media.media_type
    }

    fn control_path(&self) -> Option<&str> {
        self.media.attribute("control")
    }

    fn client_port(&self) -> u16 {
        self.client_port
    }

    fn rtcp_is_muxed(&self) -> bool {
        self.media.attributes.contains_key("rtcp-mux")
    }

    fn is_multicast(&self) -> bool {
        self.multicast
    }

    fn set_session_id(&mut self, id: &str) {
        self.session_id = Some(id.to_string());
    }

    fn apply_transport(&mut self, params: &TransportParams) {
        debug!(
            "{} stream: server port {}, channels {}-{}",
            self.media.media_type, params.server_port, params.rtp_channel, params.rtcp_channel
        );
        self.transport = Some(params.clone());
    }

    fn has_source(&self) -> bool {
        self.initiated
    }

    fn register_bye_handler(&mut self, handler: ByeHandler) {
        *self.bye_handler.lock() = Some(handler);
    }
}

/// [`MediaSession`] built from a DESCRIBE body.
#[derive(Debug)]
pub struct SdpSession {
    description: SessionDescription,
    range: RangeAttribute,
    subsessions: Vec<SdpSubsession>,
}

impl SdpSession {
    /// Parses `content`, giving subsession `i` client ports
    /// `client_port_base + 2i` and `+1`.
    pub fn parse(content: &str, client_port_base: u16) -> Result<Self> {
        let description = SessionDescription::parse(content)?;
        let range = parse_range_attribute(description.get_attribute("range"));

        let subsessions = description
            .media
            .iter()
            .enumerate()
            .map(|(i, media)| {
                let connection = media.connection.as_deref().or(description.connection.as_deref());
                let multicast = connection
                    .and_then(connection_address)
                    .is_some_and(|addr| addr.is_multicast());
                let client_port = if multicast && media.port != 0 {
                    media.port
                } else {
                    client_port_base.checked_add((2 * i) as u16).unwrap_or_else(|| {
                        warn!("No client port left for {} stream", media.media_type);
                        0
                    })
                };
                SdpSubsession {
                    media: media.clone(),
                    client_port,
                    multicast,
                    session_id: None,
                    transport: None,
                    initiated: false,
                    bye_handler: Arc::new(Mutex::new(None)),
                }
            })
            .collect();

        Ok(Self {
            description,
            range,
            subsessions,
        })
    }

    /// The parsed SDP.
    pub fn description(&self) -> &SessionDescription {
        &self.description
    }
}

impl MediaSession for SdpSession {
    type Subsession = SdpSubsession;

    fn subsessions(&self) -> &[SdpSubsession] {
        &self.subsessions
    }

    fn subsessions_mut(&mut self) -> &mut [SdpSubsession] {
        &mut self.subsessions
    }

    fn control_path(&self) -> Option<&str> {
        self.description.get_attribute("control")
    }

    fn absolute_start_time(&self) -> Option<&str> {
        self.range.absolute_start.as_deref()
    }

    fn absolute_end_time(&self) -> Option<&str> {
        self.range.absolute_end.as_deref()
    }

    fn play_start_time(&self) -> f64 {
        self.range.play_start
    }

    fn play_end_time(&self) -> f64 {
        self.range.play_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    const TWO_TRACKS: &str = "\
v=0
o=- 123 456 IN IP4 127.0.0.1
s=Test Session
c=IN IP4 127.0.0.1
t=0 0
a=control:*
a=range:npt=0-30.5
m=video 0 RTP/AVP 96
a=rtpmap:96 H264/90000
a=fmtp:96 profile-level-id=42e01f
a=control:trackID=1
m=audio 0 RTP/AVP 97
a=rtpmap:97 MPEG4-GENERIC/44100/2
a=control:trackID=2
";

    #[test]
    fn test_parse_sdp() {
        let sdp = SessionDescription::parse(TWO_TRACKS).unwrap();

        assert_eq!(sdp.version, 0);
        assert_eq!(sdp.session_name.as_deref(), Some("Test Session"));
        assert_eq!(sdp.media.len(), 2);

        let video = sdp.get_media("video").unwrap();
        assert_eq!(video.format, "96");
        assert_eq!(video.attribute("rtpmap"), Some("96 H264/90000"));
        assert_eq!(sdp.get_media("audio").unwrap().attribute("control"), Some("trackID=2"));
    }

    #[test]
    fn test_session_ports_and_range() {
        let session = SdpSession::parse(TWO_TRACKS, 6000).unwrap();
        let ports: Vec<u16> = session.subsessions().iter().map(|s| s.client_port()).collect();
        assert_eq!(ports, vec![6000, 6002]);
        assert_eq!(session.control_path(), Some("*"));
        assert_eq!(session.play_start_time(), 0.0);
        assert_eq!(session.play_end_time(), 30.5);
        assert!(session.absolute_start_time().is_none());
        assert!(!session.subsessions()[0].is_multicast());
    }

    #[test]
    fn test_clock_range_and_multicast() {
        let sdp = "v=0\r\ns=Cam\r\nc=IN IP4 239.1.2.3/16\r\n\
                   a=range:clock=20240101T000000Z-20240101T010000Z\r\n\
                   m=video 7000 RTP/AVP 96\r\n";
        let session = SdpSession::parse(sdp, 6000).unwrap();
        assert_eq!(session.absolute_start_time(), Some("20240101T000000Z"));
        assert_eq!(session.absolute_end_time(), Some("20240101T010000Z"));
        let video = &session.subsessions()[0];
        assert!(video.is_multicast());
        assert_eq!(video.client_port(), 7000);
    }

    #[tokio::test]
    async fn test_initiate_rejects_unknown_protocol() {
        let sdp = "v=0\nm=application 0 TCP/BFCP *\nm=audio 0 RTP/AVP 0\n";
        let mut session = SdpSession::parse(sdp, 5000).unwrap();
        let subsessions = session.subsessions_mut();
        assert!(matches!(
            subsessions[0].initiate().await,
            Err(RtspError::SubsessionInitiateFailed(_))
        ));
        assert!(subsessions[1].initiate().await.is_ok());
        assert!(subsessions[1].has_source());
        assert_eq!(subsessions[1].protocol_name(), "RTP");
    }

    #[test]
    fn test_bye_handler_slot() {
        let mut session = SdpSession::parse(TWO_TRACKS, 5000).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = session.subsessions()[1].bye_handler();
        session.subsessions_mut()[1].register_bye_handler(ByeHandler::new(1, tx));

        if let Some(handler) = slot.lock().as_ref() {
            handler.notify();
        }
        assert_eq!(rx.try_recv().ok(), Some(1));
    }
}
