//! Connection state machine with no I/O of its own.
//!
//! [`Engine`] owns everything that lives as long as one control connection:
//! the CSeq counter, the correlation queue, authentication state, base URL,
//! session id and interleaved channel counter. The async client drives it
//! from a single task; nothing in here blocks.

use super::auth::{md5_hash, AuthContext};
use super::parser::{IncomingRequest, Response};
use super::queue::CorrelationQueue;
use super::request::{
    encode_request, Command, CommandResult, EncodeContext, PendingRequest, Reply, ResponseHandler,
};
use super::transport::parse_transport_header;
use super::url::RtspUrl;
use crate::config::ClientConfig;
use crate::{Result, RtspError};
use log::{debug, info, warn};
use std::collections::VecDeque;

/// Result of preparing a request for the wire.
#[derive(Debug)]
pub enum Prepared {
    /// Write `wire`, then hand `request` back to [`Engine::commit`].
    Send {
        /// The encoded request, now carrying its CSeq.
        request: PendingRequest,
        /// Request text to write.
        wire: String,
    },
    /// Held until the HTTP tunnel is up.
    Deferred,
    /// Never reaches the wire; complete the request with `error`.
    Rejected {
        /// The request that was refused.
        request: PendingRequest,
        /// Why it was refused.
        error: RtspError,
    },
}

/// What the caller should do with the request a response resolved.
#[derive(Debug)]
pub enum Disposition {
    /// Deliver the result to the request's handler.
    Complete(PendingRequest, CommandResult),
    /// Credentials were accepted for a 401 challenge; send again.
    Retry(PendingRequest),
    /// Reconnect to `url` and send again.
    Redirect(PendingRequest, RtspUrl),
    /// Nothing was waiting for this response.
    Unmatched,
}

#[derive(Debug)]
enum Tunnel {
    Off,
    Pending { cookie: String, waiting: VecDeque<PendingRequest> },
    Established { cookie: String },
}

/// Protocol state of one control connection.
#[derive(Debug)]
pub struct Engine {
    base_url: String,
    server_address: String,
    session_id: Option<String>,
    session_timeout: Option<u32>,
    cseq: u32,
    tcp_channel_counter: u8,
    current_scale: f32,
    auth: AuthContext,
    queue: CorrelationQueue,
    user_agent: String,
    stream_using_tcp: bool,
    stream_outgoing: bool,
    tunnel: Tunnel,
    server_methods: Vec<String>,
}

impl Engine {
    /// Creates the state for a fresh connection to `url`. Credentials in
    /// `config` take precedence over those in the URL.
    pub fn new(config: &ClientConfig, url: &RtspUrl) -> Self {
        let username = config
            .username
            .clone()
            .or_else(|| url.username().map(String::from));
        let password = config
            .password
            .clone()
            .or_else(|| url.password().map(String::from));

        Self {
            base_url: url.as_str().to_string(),
            server_address: format!("{}:{}", url.host(), url.port()),
            session_id: None,
            session_timeout: None,
            cseq: 0,
            tcp_channel_counter: 0,
            current_scale: 1.0,
            auth: AuthContext::new(username, password),
            queue: CorrelationQueue::new(config.max_pending_requests),
            user_agent: config.application_name.clone(),
            stream_using_tcp: config.stream_using_tcp,
            stream_outgoing: config.stream_outgoing,
            tunnel: Tunnel::Off,
            server_methods: Vec::new(),
        }
    }

    /// URL requests are currently made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `host:port` of the server.
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Session id set by the first successful SETUP.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Session timeout the server announced, in seconds.
    pub fn session_timeout(&self) -> Option<u32> {
        self.session_timeout
    }

    /// CSeq of the most recently sent request.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Scale granted by the last PLAY.
    pub fn current_scale(&self) -> f32 {
        self.current_scale
    }

    /// Credentials and challenge state.
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Number of requests waiting for a response.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Methods the server advertised in its last OPTIONS reply.
    pub fn server_methods(&self) -> &[String] {
        &self.server_methods
    }

    /// The tunneling GET is out and requests are being held.
    pub fn is_tunnel_pending(&self) -> bool {
        matches!(self.tunnel, Tunnel::Pending { .. })
    }

    /// Requests are going over the HTTP tunnel.
    pub fn is_tunneled(&self) -> bool {
        matches!(self.tunnel, Tunnel::Established { .. })
    }

    /// Encodes `request` with the next CSeq. The counter only moves when
    /// encoding succeeds, so CSeq values on the wire stay strictly
    /// increasing and gap-free.
    pub fn prepare(&mut self, mut request: PendingRequest) -> Prepared {
        if let Tunnel::Pending { waiting, .. } = &mut self.tunnel {
            if !request.command.is_http() {
                debug!("Holding {} until the HTTP tunnel is up", request.command);
                waiting.push_back(request);
                return Prepared::Deferred;
            }
        }

        let cseq = self.cseq + 1;
        let cookie = match &self.tunnel {
            Tunnel::Pending { cookie, .. } | Tunnel::Established { cookie } => {
                Some(cookie.as_str())
            }
            Tunnel::Off => None,
        };
        let mut ctx = EncodeContext {
            base_url: &self.base_url,
            session_id: self.session_id.as_deref(),
            user_agent: &self.user_agent,
            auth: &self.auth,
            current_scale: self.current_scale,
            stream_using_tcp: self.stream_using_tcp,
            outgoing: self.stream_outgoing,
            tunnel_cookie: cookie,
            tcp_channel_counter: &mut self.tcp_channel_counter,
        };

        match encode_request(&mut request, cseq, &mut ctx) {
            Ok(wire) => {
                self.cseq = cseq;
                Prepared::Send { request, wire }
            }
            Err(error) => {
                warn!("Not sending {}: {}", request.command, error);
                Prepared::Rejected { request, error }
            }
        }
    }

    /// Records a request whose bytes were written. Returns a request the
    /// bounded queue had to give up on, if any. POST is never answered and
    /// is not queued.
    pub fn commit(&mut self, request: PendingRequest) -> Option<PendingRequest> {
        if request.command == Command::Post {
            return None;
        }
        self.queue.enqueue(request)
    }

    /// Matches `response` to its request and applies its effects.
    /// Requests the server skipped are returned alongside.
    pub fn handle_response(&mut self, response: Response) -> (Disposition, Vec<PendingRequest>) {
        let resolution = self.queue.resolve(response.headers.cseq);
        let Some(mut request) = resolution.matched else {
            warn!(
                "Response {} {} (CSeq {:?}) matches no request",
                response.status.code, response.status.reason, response.headers.cseq
            );
            return (Disposition::Unmatched, resolution.abandoned);
        };

        debug!(
            "{} (CSeq {}) answered {} {}",
            request.command, request.cseq, response.status.code, response.status.reason
        );

        let disposition = match response.status.code {
            200..=299 => {
                let result = self.apply_success(&request, response);
                Disposition::Complete(request, result)
            }
            401 => {
                if self.auth.on_challenge(response.headers.www_authenticate.as_deref()) {
                    info!("Retrying {} with credentials", request.command);
                    Disposition::Retry(request)
                } else {
                    let reason = match self.auth.realm() {
                        Some(realm) => format!("rejected for realm '{}'", realm),
                        None => "no usable challenge or credentials".to_string(),
                    };
                    Disposition::Complete(request, Err(RtspError::AuthenticationExhausted(reason)))
                }
            }
            301 | 302 if !request.redirected => {
                let target = response
                    .headers
                    .location
                    .as_deref()
                    .or(response.headers.content_base.as_deref());
                match target.map(RtspUrl::parse) {
                    Some(Ok(url)) => {
                        info!("{} redirected to {}", request.command, url);
                        request.redirected = true;
                        self.base_url = url.as_str().to_string();
                        self.server_address = format!("{}:{}", url.host(), url.port());
                        Disposition::Redirect(request, url)
                    }
                    Some(Err(e)) => Disposition::Complete(request, Err(e)),
                    None => Disposition::Complete(request, Err(status_error(&response))),
                }
            }
            _ => Disposition::Complete(request, Err(status_error(&response))),
        };
        (disposition, resolution.abandoned)
    }

    fn apply_success(&mut self, request: &PendingRequest, response: Response) -> CommandResult {
        let mut reply = Reply::new(request, response);

        if let Some(base) = reply.headers.content_base.as_deref() {
            if request.command == Command::Describe {
                self.base_url = base.to_string();
            }
        }

        match request.command {
            Command::Options => {
                self.server_methods = reply.methods();
            }
            Command::Setup => {
                if self.session_id.is_none() {
                    let id = reply.session_id().ok_or_else(|| {
                        RtspError::MalformedResponse("SETUP reply without a Session header".into())
                    })?;
                    info!("Session {} established", id);
                    self.session_id = Some(id);
                    self.session_timeout = reply.session_timeout();
                }
                let transport = reply.headers.transport.as_deref().unwrap_or_default();
                let params = parse_transport_header(transport)
                    .ok_or_else(|| RtspError::TransportNegotiationFailed(transport.to_string()))?;
                reply.transport = Some(params);
            }
            Command::Play => {
                if let Some(scale) = reply.scale() {
                    self.current_scale = scale;
                }
            }
            Command::Teardown => {
                info!("Session {:?} torn down", self.session_id);
                self.session_id = None;
                self.session_timeout = None;
                self.current_scale = 1.0;
            }
            _ => {}
        }
        Ok(reply)
    }

    /// Answers a request the server sent us. We implement none.
    pub fn reply_to_server(&self, request: &IncomingRequest) -> String {
        debug!("Refusing server {} request", request.method);
        match request.cseq {
            Some(cseq) => format!("RTSP/1.0 405 Method Not Allowed\r\nCSeq: {}\r\n\r\n", cseq),
            None => "RTSP/1.0 405 Method Not Allowed\r\n\r\n".to_string(),
        }
    }

    /// Starts HTTP tunneling and returns the GET that opens it.
    pub fn begin_tunnel(&mut self, handler: ResponseHandler) -> Prepared {
        let seed = format!(
            "{}:{}:{}",
            self.server_address,
            self.cseq,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let cookie = md5_hash(&seed)[..22].to_string();
        self.tunnel = Tunnel::Pending {
            cookie,
            waiting: VecDeque::new(),
        };
        self.prepare(PendingRequest::new(Command::Get, handler))
    }

    /// The GET succeeded: returns the POST that opens the request channel
    /// and the requests that were held meanwhile.
    pub fn establish_tunnel(&mut self) -> Result<(String, Vec<PendingRequest>)> {
        if !self.is_tunnel_pending() {
            return Err(RtspError::Protocol("no tunnel setup in progress".into()));
        }
        let Tunnel::Pending { cookie, waiting } = std::mem::replace(&mut self.tunnel, Tunnel::Off)
        else {
            return Err(RtspError::Protocol("no tunnel setup in progress".into()));
        };
        self.tunnel = Tunnel::Established { cookie };
        match self.prepare(PendingRequest::new(Command::Post, ResponseHandler::Ignore)) {
            Prepared::Send { wire, .. } => Ok((wire, waiting.into())),
            Prepared::Rejected { error, .. } => Err(error),
            Prepared::Deferred => Err(RtspError::Protocol("POST deferred".into())),
        }
    }

    /// The GET failed; the held requests can never be sent.
    pub fn abort_tunnel(&mut self) -> Vec<PendingRequest> {
        match std::mem::replace(&mut self.tunnel, Tunnel::Off) {
            Tunnel::Pending { waiting, .. } => waiting.into(),
            _ => Vec::new(),
        }
    }

    /// Everything still waiting, for when the connection goes away.
    pub fn abandon_all(&mut self) -> Vec<PendingRequest> {
        let mut requests = self.queue.drain();
        requests.extend(self.abort_tunnel());
        requests
    }
}

fn status_error(response: &Response) -> RtspError {
    RtspError::Status {
        code: response.status.code,
        reason: response.status.reason.clone(),
    }
}
