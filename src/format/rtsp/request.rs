//! RTSP commands, in-flight request records and the wire encoder.

use super::auth::AuthContext;
use super::parser::{
    parse_method_list, parse_rtp_info, parse_session_header, Response, ResponseHeaders, RtpInfo,
};
use super::transport::{setup_transport_header, Delivery, TransportParams, NO_CHANNEL};
use super::url::{join_control_url, RtspUrl};
use crate::{Result, RtspError};
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::oneshot;

/// Placeholder length declared by the tunneling POST, which never ends.
pub const TUNNEL_POST_CONTENT_LENGTH: u32 = 32767;

/// Every request the client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `OPTIONS`
    Options,
    /// `ANNOUNCE`
    Announce,
    /// `DESCRIBE`
    Describe,
    /// `SETUP`
    Setup,
    /// `PLAY`
    Play,
    /// `PAUSE`
    Pause,
    /// `RECORD`
    Record,
    /// `TEARDOWN`
    Teardown,
    /// `SET_PARAMETER`
    SetParameter,
    /// `GET_PARAMETER`
    GetParameter,
    /// HTTP-tunneling response channel.
    Get,
    /// HTTP-tunneling request channel.
    Post,
}

impl Command {
    /// Method name as written on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Options => "OPTIONS",
            Command::Announce => "ANNOUNCE",
            Command::Describe => "DESCRIBE",
            Command::Setup => "SETUP",
            Command::Play => "PLAY",
            Command::Pause => "PAUSE",
            Command::Record => "RECORD",
            Command::Teardown => "TEARDOWN",
            Command::SetParameter => "SET_PARAMETER",
            Command::GetParameter => "GET_PARAMETER",
            Command::Get => "GET",
            Command::Post => "POST",
        }
    }

    /// Commands that can only be sent once SETUP has produced a session id.
    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            Command::Play
                | Command::Pause
                | Command::Record
                | Command::Teardown
                | Command::SetParameter
                | Command::GetParameter
        )
    }

    /// The HTTP-tunneling requests, which are sent as `HTTP/1.0`.
    pub fn is_http(&self) -> bool {
        matches!(self, Command::Get | Command::Post)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested play range: relative NPT seconds, or absolute clock times
/// when `absolute_start` is set. A negative `start` means "resume".
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRange {
    /// NPT start in seconds.
    pub start: f64,
    /// NPT end in seconds; negative for open-ended.
    pub end: f64,
    /// `YYYYMMDDTHHMMSSZ` start of a `clock=` range.
    pub absolute_start: Option<String>,
    /// `YYYYMMDDTHHMMSSZ` end of a `clock=` range.
    pub absolute_end: Option<String>,
}

impl Default for PlayRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: -1.0,
            absolute_start: None,
            absolute_end: None,
        }
    }
}

impl PlayRange {
    /// Relative range; pass a negative `end` for "to the end".
    pub fn npt(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    /// Continue from wherever the stream was paused.
    pub fn resume() -> Self {
        Self::npt(-1.0, -1.0)
    }

    /// Wall-clock range.
    pub fn absolute(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            absolute_start: Some(format_absolute_time(&start)),
            absolute_end: end.as_ref().map(format_absolute_time),
            ..Self::default()
        }
    }

    /// The `Range:` header line for this range. See [`create_range_string`].
    pub fn header(&self) -> String {
        create_range_string(
            self.start,
            self.end,
            self.absolute_start.as_deref(),
            self.absolute_end.as_deref(),
        )
    }
}

/// Formats a time the way `clock=` ranges expect: `YYYYMMDDTHHMMSSZ`.
pub fn format_absolute_time(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Renders the `Range:` header line, or an empty string when `start` is
/// negative and no absolute start is given.
pub fn create_range_string(
    start: f64,
    end: f64,
    absolute_start: Option<&str>,
    absolute_end: Option<&str>,
) -> String {
    match (absolute_start.filter(|s| !s.is_empty()), absolute_end.filter(|s| !s.is_empty())) {
        (Some(start), Some(end)) => format!("Range: clock={}-{}\r\n", start, end),
        (Some(start), None) => format!("Range: clock={}-\r\n", start),
        (None, _) if start < 0.0 => String::new(),
        (None, _) if end < 0.0 => format!("Range: npt={:.3}-\r\n", start),
        (None, _) => format!("Range: npt={:.3}-{:.3}\r\n", start, end),
    }
}

/// What SETUP needs to know about a subsession. Copied out of the media
/// session when the request is built; the engine never holds the subsession.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsessionTarget {
    /// Position of the subsession in its session.
    pub index: usize,
    /// `a=control:` value.
    pub control: Option<String>,
    /// `"RTP"` or anything else for raw UDP.
    pub protocol_name: String,
    /// Client RTP port.
    pub client_port: u16,
    /// RTP and RTCP share one port.
    pub rtcp_muxed: bool,
    /// Ask for multicast delivery.
    pub multicast: bool,
}

/// The session-level handle of a request: the aggregate control path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTarget {
    /// Session-level `a=control:`; the base URL is used when absent.
    pub control: Option<String>,
}

/// A successful reply, as handed to a continuation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// CSeq of the request this answers.
    pub cseq: u32,
    /// Command of the request this answers.
    pub command: Command,
    /// 2xx status code.
    pub code: u16,
    /// Reason phrase.
    pub reason: String,
    /// Recognised response headers.
    pub headers: ResponseHeaders,
    /// Response body, e.g. the SDP of a DESCRIBE.
    pub body: String,
    /// Negotiated transport, for SETUP replies.
    pub transport: Option<TransportParams>,
    /// Subsession the request was about, if any.
    pub subsession: Option<usize>,
}

impl Reply {
    pub(crate) fn new(request: &PendingRequest, response: Response) -> Self {
        Self {
            cseq: request.cseq,
            command: request.command,
            code: response.status.code,
            reason: response.status.reason,
            headers: response.headers,
            body: response.body,
            transport: None,
            subsession: request.subsession.as_ref().map(|s| s.index),
        }
    }

    /// Session id from the `Session:` header.
    pub fn session_id(&self) -> Option<String> {
        self.headers
            .session
            .as_deref()
            .and_then(parse_session_header)
            .map(|(id, _)| id)
    }

    /// `timeout=` of the `Session:` header, in seconds.
    pub fn session_timeout(&self) -> Option<u32> {
        self.headers
            .session
            .as_deref()
            .and_then(parse_session_header)
            .and_then(|(_, timeout)| timeout)
    }

    /// Entries of the `RTP-Info:` header of a PLAY reply.
    pub fn rtp_info(&self) -> Vec<RtpInfo> {
        self.headers.rtp_info.as_deref().map(parse_rtp_info).unwrap_or_default()
    }

    /// `Scale:` granted by the server.
    pub fn scale(&self) -> Option<f32> {
        self.headers.scale.as_deref().and_then(|s| s.trim().parse().ok())
    }

    /// Methods listed in `Public:` (or `Allow:`) of an OPTIONS reply.
    pub fn methods(&self) -> Vec<String> {
        self.headers
            .public
            .as_deref()
            .or(self.headers.allow.as_deref())
            .map(parse_method_list)
            .unwrap_or_default()
    }
}

/// What a continuation receives.
pub type CommandResult = std::result::Result<Reply, RtspError>;

/// Where the result of a request goes. Consumed by [`ResponseHandler::complete`],
/// so it runs at most once.
pub enum ResponseHandler {
    /// Run a closure on the connection task. It must not block.
    Callback(Box<dyn FnOnce(CommandResult) + Send>),
    /// Send the result to an awaiting caller.
    Channel(oneshot::Sender<CommandResult>),
    /// Drop the result.
    Ignore,
}

impl ResponseHandler {
    /// Boxes `f` as a [`ResponseHandler::Callback`].
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        ResponseHandler::Callback(Box::new(f))
    }

    /// Delivers `result`.
    pub fn complete(self, result: CommandResult) {
        match self {
            ResponseHandler::Callback(f) => f(result),
            ResponseHandler::Channel(tx) => {
                let _ = tx.send(result);
            }
            ResponseHandler::Ignore => {}
        }
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseHandler::Callback(_) => f.write_str("Callback"),
            ResponseHandler::Channel(_) => f.write_str("Channel"),
            ResponseHandler::Ignore => f.write_str("Ignore"),
        }
    }
}

/// A command waiting to be sent or waiting for its response.
#[derive(Debug)]
pub struct PendingRequest {
    /// Assigned when the request is encoded; zero before that.
    pub cseq: u32,
    /// What to send.
    pub command: Command,
    /// Aggregate session the command applies to.
    pub session: Option<SessionTarget>,
    /// Subsession a SETUP is for.
    pub subsession: Option<SubsessionTarget>,
    /// Body, for ANNOUNCE and the parameter commands.
    pub content: Option<String>,
    /// Range of a PLAY.
    pub range: PlayRange,
    /// Scale of a PLAY.
    pub scale: f32,
    /// Where the result goes.
    pub handler: ResponseHandler,
    /// Channel pair handed out for a TCP-interleaved SETUP.
    pub(crate) interleaved: Option<(u8, u8)>,
    pub(crate) redirected: bool,
}

impl PendingRequest {
    /// A bare request for `command`.
    pub fn new(command: Command, handler: ResponseHandler) -> Self {
        Self {
            cseq: 0,
            command,
            session: None,
            subsession: None,
            content: None,
            range: PlayRange::default(),
            scale: 1.0,
            handler,
            interleaved: None,
            redirected: false,
        }
    }

    /// OPTIONS for the base URL.
    pub fn options(handler: ResponseHandler) -> Self {
        Self::new(Command::Options, handler)
    }

    /// DESCRIBE for the base URL.
    pub fn describe(handler: ResponseHandler) -> Self {
        Self::new(Command::Describe, handler)
    }

    /// ANNOUNCE carrying `sdp`.
    pub fn announce(sdp: String, handler: ResponseHandler) -> Self {
        Self::new(Command::Announce, handler).with_content(sdp)
    }

    /// SETUP for one subsession.
    pub fn setup(subsession: SubsessionTarget, handler: ResponseHandler) -> Self {
        Self::new(Command::Setup, handler).with_subsession(subsession)
    }

    /// PLAY over `range` at `scale`.
    pub fn play(
        session: SessionTarget,
        range: PlayRange,
        scale: f32,
        handler: ResponseHandler,
    ) -> Self {
        let mut request = Self::new(Command::Play, handler).with_session(session);
        request.range = range;
        request.scale = scale;
        request
    }

    /// GET_PARAMETER; an empty name makes it a plain keep-alive.
    pub fn get_parameter(session: SessionTarget, name: &str, handler: ResponseHandler) -> Self {
        let request = Self::new(Command::GetParameter, handler).with_session(session);
        if name.is_empty() {
            request
        } else {
            request.with_content(format!("{}\r\n", name))
        }
    }

    /// SET_PARAMETER with a `name: value` body.
    pub fn set_parameter(
        session: SessionTarget,
        name: &str,
        value: &str,
        handler: ResponseHandler,
    ) -> Self {
        Self::new(Command::SetParameter, handler)
            .with_session(session)
            .with_content(format!("{}: {}\r\n", name, value))
    }

    /// Sets the aggregate session.
    pub fn with_session(mut self, session: SessionTarget) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the subsession.
    pub fn with_subsession(mut self, subsession: SubsessionTarget) -> Self {
        self.subsession = Some(subsession);
        self
    }

    /// Sets the body.
    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }

    /// Resolves the request's handler. Consumes the request.
    pub fn complete(self, result: CommandResult) {
        self.handler.complete(result)
    }
}

/// Connection state the encoder reads (and, for SETUP channel ids, writes).
#[derive(Debug)]
pub struct EncodeContext<'a> {
    /// URL requests are made against.
    pub base_url: &'a str,
    /// Session id from the first successful SETUP.
    pub session_id: Option<&'a str>,
    /// `User-Agent` value.
    pub user_agent: &'a str,
    /// Source of `Authorization` headers.
    pub auth: &'a AuthContext,
    /// Scale the session is playing at.
    pub current_scale: f32,
    /// SETUP asks for TCP-interleaved delivery.
    pub stream_using_tcp: bool,
    /// SETUP asks for `mode=receive`.
    pub outgoing: bool,
    /// `x-sessioncookie` of the HTTP tunnel.
    pub tunnel_cookie: Option<&'a str>,
    /// Next interleaved channel id; advanced by two per TCP SETUP.
    pub tcp_channel_counter: &'a mut u8,
}

impl EncodeContext<'_> {
    /// URL of the aggregate session.
    fn session_url(&self, session: Option<&SessionTarget>) -> String {
        match session.and_then(|s| s.control.as_deref()) {
            Some(control) => join_control_url(self.base_url, control),
            None => self.base_url.to_string(),
        }
    }

    fn request_url(&self, request: &PendingRequest) -> String {
        match (&request.subsession, request.command) {
            (_, Command::Get | Command::Post) => RtspUrl::parse(self.base_url)
                .map(|url| url.path_and_query())
                .unwrap_or_else(|_| "/".to_string()),
            (Some(sub), _) => {
                let session_url = self.session_url(request.session.as_ref());
                join_control_url(&session_url, sub.control.as_deref().unwrap_or(""))
            }
            (None, command) if command.requires_session() => {
                self.session_url(request.session.as_ref())
            }
            (None, _) => self.base_url.to_string(),
        }
    }
}

/// Renders `request` as wire text with the given CSeq.
///
/// Session-level commands fail with [`RtspError::NoActiveSession`] when no
/// session id has been established.
pub fn encode_request(
    request: &mut PendingRequest,
    cseq: u32,
    ctx: &mut EncodeContext<'_>,
) -> Result<String> {
    let command = request.command;
    let session_id = match (command.requires_session(), ctx.session_id) {
        (true, None) => return Err(RtspError::NoActiveSession(command.as_str())),
        (_, id) => id,
    };

    let url = ctx.request_url(request);
    let protocol = if command.is_http() { "HTTP/1.0" } else { "RTSP/1.0" };

    let mut out = format!("{} {} {}\r\n", command, url, protocol);
    out.push_str(&format!("CSeq: {}\r\n", cseq));
    if let Some(authorization) = ctx.auth.authorization(command.as_str(), &url) {
        out.push_str(&format!("Authorization: {}\r\n", authorization));
    }
    out.push_str(&format!("User-Agent: {}\r\n", ctx.user_agent));

    match command {
        Command::Options | Command::Announce => out.push_str("Content-Type: application/sdp\r\n"),
        Command::Describe => out.push_str("Accept: application/sdp\r\n"),
        Command::Setup => {
            let transport = setup_transport(request, ctx)?;
            out.push_str(&format!("Transport: {}\r\n", transport));
            if let Some(id) = session_id {
                out.push_str(&format!("Session: {}\r\n", id));
            }
        }
        Command::Play => {
            push_session(&mut out, session_id);
            if request.scale != 1.0 || ctx.current_scale != 1.0 {
                out.push_str(&format!("Scale: {:.6}\r\n", request.scale));
            }
            out.push_str(&request.range.header());
        }
        Command::Pause | Command::Record | Command::Teardown => push_session(&mut out, session_id),
        Command::SetParameter | Command::GetParameter => {
            push_session(&mut out, session_id);
            if request.content.is_some() {
                out.push_str("Content-Type: text/parameters\r\n");
            }
        }
        Command::Get | Command::Post => {
            let cookie = ctx.tunnel_cookie.unwrap_or_default();
            out.push_str(&format!("x-sessioncookie: {}\r\n", cookie));
            out.push_str("Accept: application/x-rtsp-tunnelled\r\n");
            out.push_str("Pragma: no-cache\r\n");
            out.push_str("Cache-Control: no-cache\r\n");
            if command == Command::Post {
                out.push_str("Content-Type: application/x-rtsp-tunnelled\r\n");
                out.push_str(&format!("Content-Length: {}\r\n", TUNNEL_POST_CONTENT_LENGTH));
                out.push_str("Expires: Sun, 9 Jan 1972 00:00:00 GMT\r\n");
            }
        }
    }

    match request.content.as_deref() {
        Some(body) if !body.is_empty() && command != Command::Post => {
            out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            out.push_str(body);
        }
        _ => out.push_str("\r\n"),
    }

    request.cseq = cseq;
    Ok(out)
}

fn push_session(out: &mut String, session_id: Option<&str>) {
    if let Some(id) = session_id {
        out.push_str(&format!("Session: {}\r\n", id));
    }
}

fn setup_transport(request: &mut PendingRequest, ctx: &mut EncodeContext<'_>) -> Result<String> {
    let sub = request
        .subsession
        .clone()
        .ok_or_else(|| RtspError::Protocol("SETUP without a subsession".into()))?;

    let delivery = if ctx.stream_using_tcp {
        // A resend (after 401 or redirect) keeps the channels it was given.
        let (rtp, rtcp) = match request.interleaved {
            Some(pair) => pair,
            None => {
                let rtp = *ctx.tcp_channel_counter;
                let rtcp = rtp
                    .checked_add(1)
                    .filter(|c| *c < NO_CHANNEL)
                    .ok_or_else(|| {
                        RtspError::Protocol("interleaved channel ids exhausted".into())
                    })?;
                *ctx.tcp_channel_counter = rtcp.wrapping_add(1);
                (rtp, rtcp)
            }
        };
        request.interleaved = Some((rtp, rtcp));
        Delivery::Interleaved { rtp, rtcp }
    } else {
        let rtp = sub.client_port;
        let rtcp = if sub.rtcp_muxed { rtp } else { rtp.wrapping_add(1) };
        Delivery::ClientPort { rtp, rtcp }
    };

    Ok(setup_transport_header(&sub.protocol_name, &delivery, sub.multicast, ctx.outgoing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixture {
        auth: AuthContext,
        channels: u8,
        session_id: Option<String>,
        tcp: bool,
        scale: f32,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                auth: AuthContext::default(),
                channels: 0,
                session_id: None,
                tcp: false,
                scale: 1.0,
            }
        }

        fn encode(&mut self, request: &mut PendingRequest, cseq: u32) -> Result<String> {
            let mut ctx = EncodeContext {
                base_url: "rtsp://example.com/stream",
                session_id: self.session_id.as_deref(),
                user_agent: "test-agent",
                auth: &self.auth,
                current_scale: self.scale,
                stream_using_tcp: self.tcp,
                outgoing: false,
                tunnel_cookie: Some("c00kie"),
                tcp_channel_counter: &mut self.channels,
            };
            encode_request(request, cseq, &mut ctx)
        }
    }

    fn video() -> SubsessionTarget {
        SubsessionTarget {
            index: 0,
            control: Some("trackID=0".into()),
            protocol_name: "RTP".into(),
            client_port: 8000,
            rtcp_muxed: false,
            multicast: false,
        }
    }

    #[test]
    fn test_range_strings() {
        assert_eq!(create_range_string(0.0, -1.0, Some(""), Some("")), "Range: npt=0.000-\r\n");
        assert_eq!(create_range_string(-1.0, -1.0, None, None), "");
        assert_eq!(create_range_string(10.5, 20.0, None, None), "Range: npt=10.500-20.000\r\n");
        assert_eq!(
            create_range_string(-1.0, -1.0, Some("20240101T000000Z"), None),
            "Range: clock=20240101T000000Z-\r\n"
        );
        assert_eq!(
            create_range_string(0.0, -1.0, Some("20240101T000000Z"), Some("20240101T010000Z")),
            "Range: clock=20240101T000000Z-20240101T010000Z\r\n"
        );
    }

    #[test]
    fn test_absolute_time_format() {
        let time = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_absolute_time(&time), "20240305T070809Z");
        assert_eq!(
            PlayRange::absolute(time, None).header(),
            "Range: clock=20240305T070809Z-\r\n"
        );
    }

    #[test]
    fn test_describe_encoding() {
        let mut fixture = Fixture::new();
        let mut request = PendingRequest::describe(ResponseHandler::Ignore);
        let wire = fixture.encode(&mut request, 2).unwrap();
        assert_eq!(
            wire,
            "DESCRIBE rtsp://example.com/stream RTSP/1.0\r\nCSeq: 2\r\n\
             User-Agent: test-agent\r\nAccept: application/sdp\r\n\r\n"
        );
        assert_eq!(request.cseq, 2);
    }

    #[test]
    fn test_setup_udp_encoding() {
        let mut fixture = Fixture::new();
        let mut request = PendingRequest::setup(video(), ResponseHandler::Ignore);
        let wire = fixture.encode(&mut request, 3).unwrap();
        assert!(wire.starts_with("SETUP rtsp://example.com/stream/trackID=0 RTSP/1.0\r\n"));
        assert!(wire.contains("Transport: RTP/AVP;unicast;client_port=8000-8001\r\n"));
        assert!(!wire.contains("Session:"));
    }

    #[test]
    fn test_setup_absolute_control_not_prefixed() {
        let mut fixture = Fixture::new();
        let mut sub = video();
        sub.control = Some("rtsp://media.example.com/stream/track1".into());
        let mut request = PendingRequest::setup(sub, ResponseHandler::Ignore);
        let wire = fixture.encode(&mut request, 3).unwrap();
        assert!(wire.starts_with("SETUP rtsp://media.example.com/stream/track1 RTSP/1.0\r\n"));
    }

    #[test]
    fn test_setup_tcp_channels_advance() {
        let mut fixture = Fixture::new();
        fixture.tcp = true;
        fixture.session_id = Some("abcd".into());

        let mut first = PendingRequest::setup(video(), ResponseHandler::Ignore);
        let wire = fixture.encode(&mut first, 3).unwrap();
        assert!(wire.contains("Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n"));
        assert!(wire.contains("Session: abcd\r\n"));

        let mut second = PendingRequest::setup(video(), ResponseHandler::Ignore);
        let wire = fixture.encode(&mut second, 4).unwrap();
        assert!(wire.contains("interleaved=2-3"));

        // resending keeps the original channel pair
        let wire = fixture.encode(&mut first, 5).unwrap();
        assert!(wire.contains("interleaved=0-1"));
        assert_eq!(fixture.channels, 4);
    }

    #[test]
    fn test_play_requires_session() {
        let mut fixture = Fixture::new();
        let mut request = PendingRequest::play(
            SessionTarget::default(),
            PlayRange::default(),
            1.0,
            ResponseHandler::Ignore,
        );
        assert!(matches!(
            fixture.encode(&mut request, 5),
            Err(RtspError::NoActiveSession("PLAY"))
        ));
        assert_eq!(request.cseq, 0);
    }

    #[test]
    fn test_play_encoding() {
        let mut fixture = Fixture::new();
        fixture.session_id = Some("12345678".into());
        let mut request = PendingRequest::play(
            SessionTarget::default(),
            PlayRange::default(),
            1.0,
            ResponseHandler::Ignore,
        );
        let wire = fixture.encode(&mut request, 6).unwrap();
        assert_eq!(
            wire,
            "PLAY rtsp://example.com/stream RTSP/1.0\r\nCSeq: 6\r\nUser-Agent: test-agent\r\n\
             Session: 12345678\r\nRange: npt=0.000-\r\n\r\n"
        );

        let mut request = PendingRequest::play(
            SessionTarget { control: Some("*".into()) },
            PlayRange::resume(),
            2.0,
            ResponseHandler::Ignore,
        );
        let wire = fixture.encode(&mut request, 7).unwrap();
        assert!(wire.contains("Scale: 2.000000\r\n"));
        assert!(!wire.contains("Range:"));

        // a non-default session scale forces the header even at 1.0
        fixture.scale = 2.0;
        let mut request = PendingRequest::play(
            SessionTarget::default(),
            PlayRange::default(),
            1.0,
            ResponseHandler::Ignore,
        );
        let wire = fixture.encode(&mut request, 8).unwrap();
        assert!(wire.contains("Scale: 1.000000\r\n"));
    }

    #[test]
    fn test_parameter_bodies() {
        let mut fixture = Fixture::new();
        fixture.session_id = Some("s1".into());
        let mut request = PendingRequest::set_parameter(
            SessionTarget::default(),
            "barparam",
            "barstuff",
            ResponseHandler::Ignore,
        );
        let wire = fixture.encode(&mut request, 9).unwrap();
        assert!(wire.contains("Content-Type: text/parameters\r\n"));
        assert!(wire.ends_with("Content-Length: 20\r\n\r\nbarparam: barstuff\r\n"));

        let mut keepalive =
            PendingRequest::get_parameter(SessionTarget::default(), "", ResponseHandler::Ignore);
        let wire = fixture.encode(&mut keepalive, 10).unwrap();
        assert!(!wire.contains("Content-Length"));
        assert!(wire.ends_with("Session: s1\r\n\r\n"));
    }

    #[test]
    fn test_authorization_header_included() {
        let mut fixture = Fixture::new();
        fixture.auth = AuthContext::new(Some("admin".into()), Some("secret".into()));
        fixture.auth.on_challenge(Some(r#"Basic realm="cam""#));
        let mut request = PendingRequest::options(ResponseHandler::Ignore);
        let wire = fixture.encode(&mut request, 1).unwrap();
        assert!(wire.contains("CSeq: 1\r\nAuthorization: Basic YWRtaW46c2VjcmV0\r\nUser-Agent"));
        assert!(wire.contains("Content-Type: application/sdp\r\n"));
    }

    #[test]
    fn test_tunnel_requests() {
        let mut fixture = Fixture::new();
        let mut get = PendingRequest::new(Command::Get, ResponseHandler::Ignore);
        let wire = fixture.encode(&mut get, 1).unwrap();
        assert!(wire.starts_with("GET /stream HTTP/1.0\r\n"));
        assert!(wire.contains("x-sessioncookie: c00kie\r\n"));
        assert!(!wire.contains("Content-Length"));

        let mut post = PendingRequest::new(Command::Post, ResponseHandler::Ignore);
        let wire = fixture.encode(&mut post, 2).unwrap();
        assert!(wire.starts_with("POST /stream HTTP/1.0\r\n"));
        assert!(wire.contains("Content-Length: 32767\r\n"));
    }

    #[test]
    fn test_handler_runs_once() {
        let (tx, mut rx) = oneshot::channel();
        let request = PendingRequest::describe(ResponseHandler::Channel(tx));
        request.complete(Err(RtspError::Timeout));
        assert!(matches!(rx.try_recv(), Ok(Err(RtspError::Timeout))));
    }
}
